//! Fetch orchestration across the registry, durable store and network
//!
//! A request walks the tiers in order (registry, durable store, network) and
//! populates the faster tiers on the way back. Concurrent requests for the same
//! key share one pending fetch: the first caller spawns the flight and every
//! caller waits on its watch channel, so a dropped caller never aborts the
//! work the others are waiting for. Warming joins the same pending fetches, so
//! a URL is never on the wire twice at once.

use crate::network::{FetchMode, Fetcher};
use crate::registry::{HandleRegistry, DEFAULT_REGISTRY_CAPACITY};
use crate::store::{DurableCache, Lookup};
use crate::types::{
    CacheStats, DisplayHandle, HandleOrigin, ImageResponse, Resolution, StoreIdentity,
};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_WARM_CONCURRENCY: usize = 8;

type Flight = watch::Receiver<Option<Resolution>>;

/// One in-flight resolution
struct PendingFetch {
    flight: Flight,
    /// Whether a resolve caller is waiting, so the handle must be registered.
    /// Warm-only flights persist without touching the registry.
    register: bool,
}

/// Outcome of joining the pending fetch for a key
enum Joined {
    /// Settled without a flight, e.g. registered by a flight that just finished
    Ready(Resolution),
    Waiting(Flight),
}

#[derive(Default)]
struct Counters {
    registry_hits: AtomicU64,
    durable_hits: AtomicU64,
    network_fetches: AtomicU64,
    fallbacks: AtomicU64,
    coalesced: AtomicU64,
}

struct Inner {
    registry: HandleRegistry,
    durable: DurableCache,
    fetcher: Arc<dyn Fetcher>,
    /// In-flight resolutions keyed by URL
    pending: Mutex<HashMap<String, PendingFetch>>,
    /// Bumped by every invalidation. A flight persists only if the store has
    /// not been deleted since it started.
    store_epoch: RwLock<u64>,
    warm_concurrency: usize,
    counters: Counters,
}

/// Two-tier image cache
///
/// Cloning is cheap and every clone shares the same tiers.
#[derive(Clone)]
pub struct CoverCache {
    inner: Arc<Inner>,
}

/// Builder for [`CoverCache`]
pub struct CoverCacheBuilder {
    fetcher: Arc<dyn Fetcher>,
    durable: Option<DurableCache>,
    registry_capacity: u64,
    warm_concurrency: usize,
}

impl CoverCacheBuilder {
    pub fn durable(mut self, durable: DurableCache) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn registry_capacity(mut self, capacity: u64) -> Self {
        self.registry_capacity = capacity;
        self
    }

    pub fn warm_concurrency(mut self, concurrency: usize) -> Self {
        self.warm_concurrency = concurrency.max(1);
        self
    }

    pub fn build(self) -> CoverCache {
        let durable = self
            .durable
            .unwrap_or_else(|| DurableCache::unavailable(StoreIdentity::default()));

        CoverCache {
            inner: Arc::new(Inner {
                registry: HandleRegistry::new(self.registry_capacity),
                durable,
                fetcher: self.fetcher,
                pending: Mutex::new(HashMap::new()),
                store_epoch: RwLock::new(0),
                warm_concurrency: self.warm_concurrency,
                counters: Counters::default(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WarmOutcome {
    AlreadyCached,
    Persisted,
    Failed,
}

impl CoverCache {
    /// Start building a cache around a network fetcher. Without a durable
    /// store the cache runs network-only.
    pub fn builder(fetcher: Arc<dyn Fetcher>) -> CoverCacheBuilder {
        CoverCacheBuilder {
            fetcher,
            durable: None,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            warm_concurrency: DEFAULT_WARM_CONCURRENCY,
        }
    }

    /// Resolve a possibly absent key
    pub async fn resolve_optional(&self, key: Option<&str>) -> Resolution {
        match key {
            Some(key) => self.resolve(key).await,
            None => Resolution::NoSource,
        }
    }

    /// Resolve a key to a display handle, the direct-URL fallback, or nothing
    pub async fn resolve(&self, key: &str) -> Resolution {
        if key.is_empty() {
            return Resolution::NoSource;
        }

        if let Some(handle) = self.inner.registry.get(key) {
            self.inner.counters.registry_hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Registry hit");
            return Resolution::Handle(handle);
        }

        match self.join_flight(key, true).await {
            Joined::Ready(resolution) => resolution,
            Joined::Waiting(flight) => Self::settled(key, flight).await,
        }
    }

    async fn settled(key: &str, mut flight: Flight) -> Resolution {
        let outcome = flight
            .wait_for(Option::is_some)
            .await
            .map(|settled| (*settled).clone());

        match outcome {
            Ok(Some(resolution)) => resolution,
            Ok(None) | Err(_) => {
                warn!(key = %key, "Pending fetch ended without an outcome");
                Resolution::Direct(key.to_string())
            }
        }
    }

    /// Join the pending fetch for `key`, starting one if none is running.
    /// With `register` set the settled handle goes into the registry.
    async fn join_flight(&self, key: &str, register: bool) -> Joined {
        let mut pending = self.inner.pending.lock().await;

        if let Some(existing) = pending.get_mut(key) {
            // A closed channel means the flight task died before settling
            if existing.flight.has_changed().is_ok() {
                existing.register |= register;
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, register, "Joining pending fetch");
                return Joined::Waiting(existing.flight.clone());
            }
            warn!(key = %key, "Replacing abandoned pending fetch");
        }

        // Flights register before leaving the pending map, so a key settled
        // since the caller's registry check is visible here
        if register {
            if let Some(handle) = self.inner.registry.get(key) {
                self.inner.counters.registry_hits.fetch_add(1, Ordering::Relaxed);
                return Joined::Ready(Resolution::Handle(handle));
            }
        }

        let (tx, rx) = watch::channel(None);
        pending.insert(
            key.to_string(),
            PendingFetch {
                flight: rx.clone(),
                register,
            },
        );
        let epoch = *self.inner.store_epoch.read().await;
        drop(pending);

        let cache = self.clone();
        let own = rx.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let resolution = cache.populate(&key, epoch).await;

            let mut pending = cache.inner.pending.lock().await;
            let register = match pending.get(&key) {
                Some(entry) if entry.flight.same_channel(&own) => {
                    let register = entry.register;
                    pending.remove(&key);
                    register
                }
                _ => false,
            };
            let resolution = match resolution {
                Resolution::Handle(handle) if register => {
                    Resolution::Handle(cache.register(&key, handle))
                }
                other => other,
            };
            tx.send_replace(Some(resolution));
        });

        Joined::Waiting(rx)
    }

    /// Walk the durable store and network for a key with no registry entry.
    /// The handle is registered by the caller once the flight settles.
    async fn populate(&self, key: &str, epoch: u64) -> Resolution {
        match self.inner.durable.lookup(key).await {
            Lookup::Hit(response) => {
                self.inner.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                return Resolution::Handle(DisplayHandle::materialize(
                    response,
                    HandleOrigin::Durable,
                ));
            }
            Lookup::Miss => {}
            Lookup::Unavailable => {
                debug!(key = %key, "Durable store unavailable, going to network")
            }
        }

        self.inner.counters.network_fetches.fetch_add(1, Ordering::Relaxed);
        match self.inner.fetcher.fetch(key, FetchMode::Cors).await {
            Ok(response) if response.is_success() => {
                let persisted = response.clone();
                let handle = DisplayHandle::materialize(response, HandleOrigin::Network);
                self.persist(key, &persisted, epoch).await;
                Resolution::Handle(handle)
            }
            Ok(response) => {
                self.inner.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %key,
                    status = response.status,
                    "Unusable response, falling back to direct URL"
                );
                Resolution::Direct(key.to_string())
            }
            Err(e) => {
                self.inner.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, error = %e, "Fetch failed, falling back to direct URL");
                Resolution::Direct(key.to_string())
            }
        }
    }

    /// Persist unless the store was invalidated after the flight started
    async fn persist(&self, key: &str, response: &ImageResponse, epoch: u64) -> bool {
        let current = self.inner.store_epoch.read().await;
        if *current != epoch {
            debug!(key = %key, "Store invalidated during fetch, not persisting");
            return false;
        }
        self.inner.durable.store(key, response).await
    }

    fn register(&self, key: &str, handle: DisplayHandle) -> DisplayHandle {
        match self.inner.registry.put(key, handle.clone()) {
            Ok(()) => handle,
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "Handle materialized twice, keeping the registered one"
                );
                self.inner.registry.get(key).unwrap_or(handle)
            }
        }
    }

    /// Prime the durable store with `urls`. Per-URL failures are logged and
    /// skipped; nothing is added to the registry unless a resolve joins the
    /// same fetch.
    pub async fn warm<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.inner.durable.is_available() {
            debug!("Durable store unavailable, skipping warm");
            return;
        }

        let mut seen = HashSet::new();
        let urls: Vec<String> = urls
            .into_iter()
            .map(Into::into)
            .filter(|url| !url.is_empty() && seen.insert(url.clone()))
            .collect();
        let requested = urls.len();

        let outcomes: Vec<WarmOutcome> = stream::iter(urls)
            .map(|url| async move { self.warm_one(&url).await })
            .buffer_unordered(self.inner.warm_concurrency)
            .collect()
            .await;

        let count = |wanted: WarmOutcome| outcomes.iter().filter(|o| **o == wanted).count();
        info!(
            requested,
            persisted = count(WarmOutcome::Persisted),
            already_cached = count(WarmOutcome::AlreadyCached),
            failed = count(WarmOutcome::Failed),
            "Warm finished"
        );
    }

    /// Fire-and-forget variant of [`CoverCache::warm`]
    pub fn warm_in_background(&self, urls: Vec<String>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move { cache.warm(urls).await })
    }

    async fn warm_one(&self, url: &str) -> WarmOutcome {
        if self.inner.durable.contains(url).await {
            return WarmOutcome::AlreadyCached;
        }

        let resolution = match self.join_flight(url, false).await {
            Joined::Ready(resolution) => resolution,
            Joined::Waiting(flight) => Self::settled(url, flight).await,
        };

        match resolution {
            Resolution::Handle(handle) if handle.origin() == HandleOrigin::Durable => {
                WarmOutcome::AlreadyCached
            }
            Resolution::Handle(_) => WarmOutcome::Persisted,
            Resolution::Direct(_) | Resolution::NoSource => {
                debug!(url = %url, "Warm fetch failed");
                WarmOutcome::Failed
            }
        }
    }

    /// Delete the whole durable store. Registry entries stay servable until
    /// [`CoverCache::clear_registry`] or process exit. Fetches already in
    /// flight still settle for their callers but do not write into the fresh
    /// store.
    pub async fn invalidate(&self) {
        let mut epoch = self.inner.store_epoch.write().await;
        *epoch += 1;
        self.inner.durable.delete().await;
    }

    pub fn clear_registry(&self) {
        self.inner.registry.clear();
    }

    pub fn is_durable_available(&self) -> bool {
        self.inner.durable.is_available()
    }

    /// Keys currently held by the durable store
    pub async fn durable_keys(&self) -> Vec<String> {
        self.inner.durable.keys().await
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            registry_entries: self.inner.registry.len(),
            registry_hits: c.registry_hits.load(Ordering::Relaxed),
            durable_hits: c.durable_hits.load(Ordering::Relaxed),
            network_fetches: c.network_fetches.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            durable_available: self.inner.durable.is_available(),
        }
    }
}

//! Consumer lifecycle guard
//!
//! A [`CoverSubscription`] is one UI consumer's interest in a key. It starts a
//! resolution when the key is set, applies the outcome only while the
//! consumer is alive and still interested in that key, and never cancels the
//! shared pending fetch behind it.

use crate::orchestrator::CoverCache;
use crate::types::{ImageSource, Resolution};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// What a consumer currently has to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverState {
    /// Resolution outstanding; nothing to show yet
    Pending,
    Ready(ImageSource),
    NoSource,
    /// The renderer could not display the source; terminal until the key changes
    Errored,
}

struct Interest {
    key: Option<String>,
    alive: bool,
}

struct Shared {
    interest: Mutex<Interest>,
    state: watch::Sender<CoverState>,
}

impl Shared {
    fn interest(&self) -> MutexGuard<'_, Interest> {
        self.interest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, key: &str, resolution: Resolution) {
        let interest = self.interest();
        if !interest.alive {
            debug!(key = %key, "Consumer torn down, discarding resolution");
            return;
        }
        if interest.key.as_deref() != Some(key) {
            debug!(key = %key, "Consumer moved to another key, discarding resolution");
            return;
        }
        if *self.state.borrow() == CoverState::Errored {
            return;
        }

        let next = match resolution.into_source() {
            Some(source) => CoverState::Ready(source),
            None => CoverState::NoSource,
        };
        self.state.send_replace(next);
    }
}

/// A consumer's subscription to a cover image
///
/// Must be created and re-keyed from within a tokio runtime. Dropping the
/// subscription tears it down.
pub struct CoverSubscription {
    cache: CoverCache,
    shared: Arc<Shared>,
    rx: watch::Receiver<CoverState>,
}

impl CoverCache {
    /// Subscribe a consumer to `key`, starting its resolution
    pub fn subscribe(&self, key: Option<&str>) -> CoverSubscription {
        CoverSubscription::new(self.clone(), key)
    }
}

impl CoverSubscription {
    fn new(cache: CoverCache, key: Option<&str>) -> Self {
        let (tx, rx) = watch::channel(CoverState::Pending);
        let subscription = Self {
            cache,
            shared: Arc::new(Shared {
                interest: Mutex::new(Interest {
                    key: None,
                    alive: true,
                }),
                state: tx,
            }),
            rx,
        };
        subscription.request(key);
        subscription
    }

    fn request(&self, key: Option<&str>) {
        let key = key.filter(|k| !k.is_empty()).map(str::to_string);
        {
            let mut interest = self.shared.interest();
            interest.key = key.clone();
            let next = if key.is_some() {
                CoverState::Pending
            } else {
                CoverState::NoSource
            };
            self.shared.state.send_if_modified(|state| {
                if *state == next {
                    return false;
                }
                *state = next;
                true
            });
        }

        let Some(key) = key else {
            return;
        };
        let cache = self.cache.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let resolution = cache.resolve(&key).await;
            shared.apply(&key, resolution);
        });
    }

    pub fn key(&self) -> Option<String> {
        self.shared.interest().key.clone()
    }

    pub fn state(&self) -> CoverState {
        self.rx.borrow().clone()
    }

    /// Receiver observing every state change of this consumer
    pub fn watch(&self) -> watch::Receiver<CoverState> {
        self.shared.state.subscribe()
    }

    /// Wait for the next state change
    pub async fn changed(&mut self) -> CoverState {
        // The sender lives in `shared`, which we hold, so the channel stays open
        let _ = self.rx.changed().await;
        self.rx.borrow_and_update().clone()
    }

    /// Wait until the state is no longer pending
    pub async fn settled(&mut self) -> CoverState {
        match self.rx.wait_for(|s| *s != CoverState::Pending).await {
            Ok(state) => state.clone(),
            Err(_) => CoverState::Pending,
        }
    }

    /// Point the consumer at a new key. Outcomes for the old key are ignored
    /// once they arrive; the old fetch itself keeps running.
    pub fn set_key(&self, key: Option<&str>) {
        let current = self.key();
        if current.as_deref() == key.filter(|k| !k.is_empty()) {
            return;
        }
        self.request(key);
    }

    /// Record that the renderer failed to display the current source
    ///
    /// Returns whether the consumer moved to [`CoverState::Errored`]. No
    /// automatic retry follows.
    pub fn report_render_error(&self) -> bool {
        let interest = self.shared.interest();
        if !interest.alive || !matches!(*self.shared.state.borrow(), CoverState::Ready(_)) {
            return false;
        }
        debug!(key = ?interest.key, "Render failed, showing fallback");
        self.shared.state.send_replace(CoverState::Errored);
        true
    }

    /// Build the consumer's view: `source_view` for a ready source,
    /// `fallback_view` after a render error, `None` otherwise
    pub fn render<T>(
        &self,
        source_view: impl FnOnce(&ImageSource) -> T,
        fallback_view: impl FnOnce() -> T,
    ) -> Option<T> {
        match &*self.rx.borrow() {
            CoverState::Ready(source) => Some(source_view(source)),
            CoverState::Errored => Some(fallback_view()),
            CoverState::Pending | CoverState::NoSource => None,
        }
    }

    /// Stop applying results to this consumer
    pub fn teardown(self) {}
}

impl Drop for CoverSubscription {
    fn drop(&mut self) {
        self.shared.interest().alive = false;
    }
}

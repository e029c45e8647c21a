//! Durable byte store (cross-session tier)
//!
//! [`ByteStore`] is the narrow contract to whatever persists responses:
//! named stores holding `url -> response` entries. [`DurableCache`] wraps a
//! backend for one named store, reports whether the facility exists at all,
//! and turns every backend failure into a miss or a no-op.

use crate::error::StoreResult;
use crate::types::{ImageResponse, StoreIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Persistent named key/response storage
#[async_trait]
pub trait ByteStore: Send + Sync {
    /// Create the named store if it does not exist yet
    async fn open(&self, store: &str) -> StoreResult<()>;

    async fn match_key(&self, store: &str, key: &str) -> StoreResult<Option<ImageResponse>>;

    async fn put(&self, store: &str, key: &str, response: &ImageResponse) -> StoreResult<()>;

    /// Remove the whole named store, returning whether it existed
    async fn delete_store(&self, store: &str) -> StoreResult<bool>;

    async fn keys(&self, store: &str) -> StoreResult<Vec<String>>;
}

/// Metadata written next to each stored body
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    size: u64,
    stored_at: DateTime<Utc>,
}

/// File-backed store: one directory per named store, `<sha256>.body` and
/// `<sha256>.json` per entry
pub struct FsByteStore {
    root: PathBuf,
}

impl FsByteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File stem for a key
    pub fn entry_stem(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn store_dir(&self, store: &str) -> PathBuf {
        self.root.join(store)
    }

    async fn read_meta(&self, path: &Path) -> StoreResult<Option<EntryMeta>> {
        match fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write to a sibling temp file and rename it into place
async fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ByteStore for FsByteStore {
    async fn open(&self, store: &str) -> StoreResult<()> {
        fs::create_dir_all(self.store_dir(store)).await?;
        Ok(())
    }

    async fn match_key(&self, store: &str, key: &str) -> StoreResult<Option<ImageResponse>> {
        let dir = self.store_dir(store);
        let stem = Self::entry_stem(key);

        let Some(meta) = self.read_meta(&dir.join(format!("{stem}.json"))).await? else {
            return Ok(None);
        };
        if meta.url != key {
            return Ok(None);
        }

        let body = match fs::read(dir.join(format!("{stem}.body"))).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if body.len() as u64 != meta.size {
            warn!(
                key = %key,
                expected = meta.size,
                actual = body.len(),
                "Stored body size mismatch, treating as miss"
            );
            return Ok(None);
        }

        Ok(Some(ImageResponse {
            status: meta.status,
            headers: meta.headers,
            body: Bytes::from(body),
        }))
    }

    async fn put(&self, store: &str, key: &str, response: &ImageResponse) -> StoreResult<()> {
        let dir = self.store_dir(store);
        let stem = Self::entry_stem(key);

        // Body first: a metadata file is only ever visible next to a complete body
        write_atomic(&dir.join(format!("{stem}.body")), &response.body).await?;

        let meta = EntryMeta {
            url: key.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            size: response.body.len() as u64,
            stored_at: Utc::now(),
        };
        write_atomic(&dir.join(format!("{stem}.json")), &serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    async fn delete_store(&self, store: &str) -> StoreResult<bool> {
        match fs::remove_dir_all(self.store_dir(store)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, store: &str) -> StoreResult<Vec<String>> {
        let mut dir = match fs::read_dir(self.store_dir(store)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(meta) = self.read_meta(&path).await? {
                keys.push(meta.url);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store, useful where nothing may touch the disk
#[derive(Default)]
pub struct MemoryByteStore {
    stores: RwLock<HashMap<String, HashMap<String, ImageResponse>>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ByteStore for MemoryByteStore {
    async fn open(&self, store: &str) -> StoreResult<()> {
        let mut stores = self.stores.write().await;
        stores.entry(store.to_string()).or_default();
        Ok(())
    }

    async fn match_key(&self, store: &str, key: &str) -> StoreResult<Option<ImageResponse>> {
        let stores = self.stores.read().await;
        Ok(stores.get(store).and_then(|s| s.get(key)).cloned())
    }

    async fn put(&self, store: &str, key: &str, response: &ImageResponse) -> StoreResult<()> {
        let mut stores = self.stores.write().await;
        stores
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn delete_store(&self, store: &str) -> StoreResult<bool> {
        let mut stores = self.stores.write().await;
        Ok(stores.remove(store).is_some())
    }

    async fn keys(&self, store: &str) -> StoreResult<Vec<String>> {
        let stores = self.stores.read().await;
        let mut keys: Vec<String> = stores
            .get(store)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

/// Result of probing the durable tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// No durable facility in this environment
    Unavailable,
    Miss,
    Hit(ImageResponse),
}

/// Capability-checked adapter over one named durable store
#[derive(Clone)]
pub struct DurableCache {
    backend: Option<Arc<dyn ByteStore>>,
    identity: StoreIdentity,
}

impl DurableCache {
    /// Wrap a backend that is known to work
    pub fn new(backend: Arc<dyn ByteStore>, identity: StoreIdentity) -> Self {
        Self {
            backend: Some(backend),
            identity,
        }
    }

    /// Adapter for an environment without durable storage
    pub fn unavailable(identity: StoreIdentity) -> Self {
        Self {
            backend: None,
            identity,
        }
    }

    /// Probe the backend by opening the store; degrade to unavailable on failure
    pub async fn detect(backend: Arc<dyn ByteStore>, identity: StoreIdentity) -> Self {
        let name = identity.store_name();
        match backend.open(&name).await {
            Ok(()) => {
                info!(store = %name, "Durable store opened");
                Self::new(backend, identity)
            }
            Err(e) => {
                warn!(
                    store = %name,
                    error = %e,
                    "Durable store unavailable, continuing network-only"
                );
                Self::unavailable(identity)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    pub async fn lookup(&self, key: &str) -> Lookup {
        let Some(backend) = &self.backend else {
            return Lookup::Unavailable;
        };
        let name = self.identity.store_name();

        let result = match backend.open(&name).await {
            Ok(()) => backend.match_key(&name, key).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(response)) => {
                debug!(key = %key, "Durable store hit");
                Lookup::Hit(response)
            }
            Ok(None) => {
                debug!(key = %key, "Durable store miss");
                Lookup::Miss
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Durable store read failed, treating as miss");
                Lookup::Miss
            }
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        matches!(self.lookup(key).await, Lookup::Hit(_))
    }

    /// Persist a response; failures are logged and swallowed
    pub async fn store(&self, key: &str, response: &ImageResponse) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };
        let name = self.identity.store_name();

        let result = match backend.open(&name).await {
            Ok(()) => backend.put(&name, key, response).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(key = %key, size = response.body.len(), "Persisted response");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to persist response");
                false
            }
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        backend
            .keys(&self.identity.store_name())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to enumerate durable store");
                Vec::new()
            })
    }

    /// Delete the whole named store
    pub async fn delete(&self) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };
        let name = self.identity.store_name();
        match backend.delete_store(&name).await {
            Ok(existed) => {
                info!(store = %name, existed, "Deleted durable store");
                existed
            }
            Err(e) => {
                warn!(store = %name, error = %e, "Failed to delete durable store");
                false
            }
        }
    }
}

/// Backend whose facility is missing; every call fails as unavailable
#[cfg(test)]
pub(crate) struct MissingByteStore;

#[cfg(test)]
fn missing<T>() -> StoreResult<T> {
    Err(crate::error::StoreError::Unavailable(
        "no storage in sandbox".to_string(),
    ))
}

#[cfg(test)]
#[async_trait]
impl ByteStore for MissingByteStore {
    async fn open(&self, _store: &str) -> StoreResult<()> {
        missing()
    }

    async fn match_key(&self, _store: &str, _key: &str) -> StoreResult<Option<ImageResponse>> {
        missing()
    }

    async fn put(&self, _store: &str, _key: &str, _response: &ImageResponse) -> StoreResult<()> {
        missing()
    }

    async fn delete_store(&self, _store: &str) -> StoreResult<bool> {
        missing()
    }

    async fn keys(&self, _store: &str) -> StoreResult<Vec<String>> {
        missing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KEY: &str = "https://covers.example/isbn/9780141439518-L.jpg";

    fn cover() -> ImageResponse {
        ImageResponse::new(
            200,
            vec![("content-type".to_string(), "image/jpeg".to_string())],
            &b"\xff\xd8\xff\xe0jpeg"[..],
        )
    }

    #[test]
    fn test_entry_stem() {
        let a = FsByteStore::entry_stem(KEY);
        assert_eq!(a, FsByteStore::entry_stem(KEY));
        assert_ne!(a, FsByteStore::entry_stem("https://covers.example/other.jpg"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_fs_put_and_match() {
        let dir = tempdir().unwrap();
        let store = FsByteStore::new(dir.path());
        store.open("covers-v1").await.unwrap();

        assert_eq!(store.match_key("covers-v1", KEY).await.unwrap(), None);

        store.put("covers-v1", KEY, &cover()).await.unwrap();
        let hit = store.match_key("covers-v1", KEY).await.unwrap().unwrap();
        assert_eq!(hit, cover());
        assert_eq!(store.keys("covers-v1").await.unwrap(), vec![KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_fs_stores_are_isolated_by_name() {
        let dir = tempdir().unwrap();
        let store = FsByteStore::new(dir.path());
        store.open("covers-v1").await.unwrap();
        store.open("covers-v2").await.unwrap();
        store.put("covers-v1", KEY, &cover()).await.unwrap();

        assert!(store.match_key("covers-v2", KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_delete_store() {
        let dir = tempdir().unwrap();
        let store = FsByteStore::new(dir.path());
        store.open("covers-v1").await.unwrap();
        store.put("covers-v1", KEY, &cover()).await.unwrap();

        assert!(store.delete_store("covers-v1").await.unwrap());
        assert!(!store.delete_store("covers-v1").await.unwrap());
        assert!(store.match_key("covers-v1", KEY).await.unwrap().is_none());
        assert!(store.keys("covers-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_missing_body_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = FsByteStore::new(dir.path());
        store.open("covers-v1").await.unwrap();
        store.put("covers-v1", KEY, &cover()).await.unwrap();

        let body = dir
            .path()
            .join("covers-v1")
            .join(format!("{}.body", FsByteStore::entry_stem(KEY)));
        std::fs::remove_file(body).unwrap();

        assert!(store.match_key("covers-v1", KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_truncated_body_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = FsByteStore::new(dir.path());
        store.open("covers-v1").await.unwrap();
        store.put("covers-v1", KEY, &cover()).await.unwrap();

        let body = dir
            .path()
            .join("covers-v1")
            .join(format!("{}.body", FsByteStore::entry_stem(KEY)));
        std::fs::write(&body, b"\xff\xd8").unwrap();

        assert!(store.match_key("covers-v1", KEY).await.unwrap().is_none());
        // The entry is still listed; the next put overwrites it
        store.put("covers-v1", KEY, &cover()).await.unwrap();
        assert_eq!(store.match_key("covers-v1", KEY).await.unwrap(), Some(cover()));
    }

    #[tokio::test]
    async fn test_fs_put_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FsByteStore::new(dir.path());
        store.open("covers-v1").await.unwrap();
        store.put("covers-v1", KEY, &cover()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("covers-v1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryByteStore::new();
        store.open("covers-v1").await.unwrap();
        store.put("covers-v1", KEY, &cover()).await.unwrap();
        assert!(store.match_key("covers-v1", KEY).await.unwrap().is_some());
        assert!(store.delete_store("covers-v1").await.unwrap());
        assert!(store.match_key("covers-v1", KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detect_missing_facility() {
        let cache =
            DurableCache::detect(Arc::new(MissingByteStore), StoreIdentity::default()).await;
        assert!(!cache.is_available());
        assert_eq!(cache.lookup(KEY).await, Lookup::Unavailable);
        assert!(!cache.store(KEY, &cover()).await);
        assert!(!cache.delete().await);
    }

    #[tokio::test]
    async fn test_read_failure_is_a_miss() {
        // Available at construction time, failing afterwards
        let cache = DurableCache::new(Arc::new(MissingByteStore), StoreIdentity::default());
        assert!(cache.is_available());
        assert_eq!(cache.lookup(KEY).await, Lookup::Miss);
        assert!(!cache.store(KEY, &cover()).await);
        assert!(cache.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_schema_version_bump_invalidates() {
        let backend: Arc<dyn ByteStore> = Arc::new(MemoryByteStore::new());
        let v1 = DurableCache::detect(backend.clone(), StoreIdentity::new("covers", 1)).await;
        assert!(v1.store(KEY, &cover()).await);
        assert!(v1.contains(KEY).await);

        let v2 = DurableCache::detect(backend, StoreIdentity::new("covers", 2)).await;
        assert_eq!(v2.lookup(KEY).await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_delete_then_reopen_on_next_write() {
        let dir = tempdir().unwrap();
        let cache = DurableCache::detect(
            Arc::new(FsByteStore::new(dir.path())),
            StoreIdentity::default(),
        )
        .await;
        assert!(cache.store(KEY, &cover()).await);
        assert!(cache.delete().await);
        assert_eq!(cache.lookup(KEY).await, Lookup::Miss);

        assert!(cache.store(KEY, &cover()).await);
        assert!(cache.contains(KEY).await);
    }
}

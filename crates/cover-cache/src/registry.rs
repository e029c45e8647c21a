//! In-process handle registry (fast tier)

use crate::error::RegistryError;
use crate::types::DisplayHandle;
use moka::sync::Cache;
use tracing::debug;

pub const DEFAULT_REGISTRY_CAPACITY: u64 = 10_000;

/// Maps a cache key to the display handle materialized for it
///
/// Bounded by entry count. An evicted handle stays alive for any consumer
/// still holding a clone; the registry only drops its own reference.
pub struct HandleRegistry {
    entries: Cache<String, DisplayHandle>,
}

impl HandleRegistry {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<DisplayHandle> {
        self.entries.get(key)
    }

    /// Register a handle for a key that has none yet
    pub fn put(&self, key: &str, handle: DisplayHandle) -> Result<(), RegistryError> {
        let entry = self
            .entries
            .entry_by_ref(key)
            .or_insert_with(|| handle);
        if entry.is_fresh() {
            debug!(key = %key, "Registered display handle");
            Ok(())
        } else {
            Err(RegistryError::AlreadyRegistered(key.to_string()))
        }
    }

    /// Drop every entry; handles held elsewhere are unaffected
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

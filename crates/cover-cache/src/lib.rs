//! Two-tier image cache
//!
//! Serves remote images by URL through an in-process registry of display
//! handles backed by a durable byte store, fetching from the network only
//! when both tiers miss. Concurrent requests for one URL share a single
//! fetch, and images that cannot be fetched programmatically (CORS, errors)
//! resolve to the URL itself so the caller's own loader can try.

pub mod error;
pub mod guard;
pub mod network;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{FetchError, RegistryError, StoreError};
pub use guard::{CoverState, CoverSubscription};
pub use network::{FetchMode, Fetcher, HttpFetcher, HttpFetcherConfig};
pub use orchestrator::{CoverCache, CoverCacheBuilder};
pub use registry::HandleRegistry;
pub use store::{ByteStore, DurableCache, FsByteStore, Lookup, MemoryByteStore};
pub use types::{
    CacheStats, DisplayHandle, HandleOrigin, ImageResponse, ImageSource, Resolution,
    StoreIdentity,
};

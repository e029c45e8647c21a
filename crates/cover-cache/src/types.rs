//! Core types shared by the cache tiers

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Which tier produced the bytes behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleOrigin {
    Durable,
    Network,
}

impl HandleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOrigin::Durable => "durable",
            HandleOrigin::Network => "network",
        }
    }
}

/// Process-local reference to image bytes, cheap to clone and hand to a renderer
///
/// Two handles are equal only if they came from the same materialization.
#[derive(Clone)]
pub struct DisplayHandle {
    id: u64,
    body: Bytes,
    content_type: String,
    origin: HandleOrigin,
}

impl DisplayHandle {
    /// Materialize a handle from a response body
    pub fn materialize(response: ImageResponse, origin: HandleOrigin) -> Self {
        let content_type = response.content_type().to_string();
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            body: response.body,
            content_type,
            origin,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Reference string for this handle, valid for the process lifetime
    pub fn url(&self) -> String {
        format!("cover-cache://handle/{}", self.id)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn origin(&self) -> HandleOrigin {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl PartialEq for DisplayHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DisplayHandle {}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("id", &self.id)
            .field("size", &self.body.len())
            .field("content_type", &self.content_type)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Raw response as fetched from the network or kept in the durable store
///
/// The body is an immutable shared buffer: cloning the response for
/// persistence never consumes the bytes used for the display handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ImageResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Something a renderer can display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Handle(DisplayHandle),
    /// The raw key, for loaders that manage their own transport
    Url(String),
}

/// Outcome of resolving a key through the tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Handle(DisplayHandle),
    /// Programmatic fetch failed; use the key itself as the source
    Direct(String),
    /// No key was given
    NoSource,
}

impl Resolution {
    pub fn into_source(self) -> Option<ImageSource> {
        match self {
            Resolution::Handle(handle) => Some(ImageSource::Handle(handle)),
            Resolution::Direct(url) => Some(ImageSource::Url(url)),
            Resolution::NoSource => None,
        }
    }
}

/// Identity of the named durable store
///
/// Bumping `schema_version` points the cache at a fresh store, which is how
/// all earlier entries get invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIdentity {
    pub name: String,
    pub schema_version: u32,
}

impl StoreIdentity {
    pub fn new(name: impl Into<String>, schema_version: u32) -> Self {
        Self {
            name: name.into(),
            schema_version,
        }
    }

    pub fn store_name(&self) -> String {
        format!("{}-v{}", self.name, self.schema_version)
    }
}

impl Default for StoreIdentity {
    fn default() -> Self {
        Self::new("book-covers-cache", 1)
    }
}

/// Counters describing how requests were served
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub registry_entries: u64,
    pub registry_hits: u64,
    pub durable_hits: u64,
    pub network_fetches: u64,
    pub fallbacks: u64,
    pub coalesced: u64,
    pub durable_available: bool,
}

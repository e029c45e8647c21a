//! Error types for the cover cache
//!
//! None of these escape the public [`crate::CoverCache`] operations; they are
//! raised by the adapters and absorbed at the tier boundary.

use std::fmt;

/// Failure of the durable byte store
#[derive(Debug)]
pub enum StoreError {
    Io(Box<std::io::Error>),
    Serialization(String),
    /// The durable facility does not exist in this environment
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "Store IO error: {}", err),
            StoreError::Serialization(msg) => write!(f, "Store metadata error: {}", msg),
            StoreError::Unavailable(msg) => write!(f, "Durable store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Failure of a programmatic network fetch
#[derive(Debug)]
pub enum FetchError {
    Http(Box<reqwest::Error>),
    InvalidUrl(String),
    /// The response was not readable under cross-origin rules
    CorsRejected(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Http(err) => write!(f, "HTTP error: {}", err),
            FetchError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            FetchError::CorsRejected(msg) => write!(f, "CORS rejected: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(Box::new(err))
    }
}

/// Rejected handle registry mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyRegistered(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRegistered(key) => {
                write!(f, "Handle already registered for {}", key)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type FetchResult<T> = std::result::Result<T, FetchError>;

//! Request, response and configuration types for the proxy

use cover_cache::CacheStats;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration for the cover cache proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    pub store_name: String,
    pub store_version: u32,
    pub registry_capacity: u64,
    pub warm_concurrency: usize,
    pub fetch_timeout_secs: u64,
    /// Origin presented on CORS-mode fetches
    pub cors_origin: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3005,
            cache_dir: PathBuf::from("./cache/covers"),
            store_name: "book-covers-cache".to_string(),
            store_version: 1,
            registry_capacity: 10_000,
            warm_concurrency: 8,
            fetch_timeout_secs: 30,
            cors_origin: None,
        }
    }
}

impl ProxyConfig {
    /// Read configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Read configuration through `var`; unset or unparsable values keep their default
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            port: parse_var(&var, "PORT").unwrap_or(defaults.port),
            cache_dir: var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            store_name: var("STORE_NAME")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.store_name),
            store_version: parse_var(&var, "STORE_VERSION").unwrap_or(defaults.store_version),
            registry_capacity: parse_var(&var, "REGISTRY_CAPACITY")
                .unwrap_or(defaults.registry_capacity),
            warm_concurrency: parse_var(&var, "WARM_CONCURRENCY")
                .unwrap_or(defaults.warm_concurrency),
            fetch_timeout_secs: parse_var(&var, "FETCH_TIMEOUT_SECS")
                .unwrap_or(defaults.fetch_timeout_secs),
            cors_origin: var("CORS_ORIGIN").filter(|s| !s.is_empty()),
        }
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    var(name).and_then(|v| v.trim().parse().ok())
}

/// Query for `GET /cover`
#[derive(Debug, Deserialize)]
pub struct CoverQuery {
    pub url: Option<String>,
}

/// Body for `POST /warm`
#[derive(Debug, Deserialize)]
pub struct WarmRequest {
    pub urls: Vec<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

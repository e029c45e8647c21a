//! Cover cache proxy
//!
//! Serves remote cover images through the two-tier cover cache so browser
//! clients get cached bytes, or a redirect to the original URL when the image
//! cannot be fetched programmatically.

mod error;
mod server;
mod types;

use crate::error::{ProxyError, Result};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use cover_cache::{
    CoverCache, DurableCache, FsByteStore, HttpFetcher, HttpFetcherConfig, StoreIdentity,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("cover_cache_proxy=info".parse()?)
        .add_directive("cover_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting cover cache proxy...");

    let config = ProxyConfig::from_env();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Registry capacity: {}", config.registry_capacity);

    let identity = StoreIdentity::new(config.store_name.clone(), config.store_version);
    info!("Durable store: {}", identity.store_name());
    let backend = Arc::new(FsByteStore::new(&config.cache_dir));
    let durable = DurableCache::detect(backend, identity).await;

    let fetcher = HttpFetcher::new(HttpFetcherConfig {
        timeout: Duration::from_secs(config.fetch_timeout_secs),
        origin: config.cors_origin.clone(),
    })?;

    let cache = CoverCache::builder(Arc::new(fetcher))
        .durable(durable)
        .registry_capacity(config.registry_capacity)
        .warm_concurrency(config.warm_concurrency)
        .build();

    let state: SharedState = Arc::new(ServerState::new(cache));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

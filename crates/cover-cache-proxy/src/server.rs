//! HTTP server for cover cache endpoints
//!
//! Provides /health, /cover, /warm and /cache.

use crate::types::{CoverQuery, HealthResponse, WarmRequest};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use cover_cache::{CoverCache, Resolution};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: CoverCache,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: CoverCache) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cover", get(get_cover))
        .route("/warm", post(warm))
        .route("/cache", delete(invalidate))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.cache.stats(),
    })
}

/// Serve a cover by URL, or redirect to the URL when it cannot be fetched here
async fn get_cover(State(state): State<SharedState>, Query(query): Query<CoverQuery>) -> Response {
    match state.cache.resolve_optional(query.url.as_deref()).await {
        Resolution::Handle(handle) => (
            [
                (header::CONTENT_TYPE, handle.content_type().to_string()),
                (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
                (
                    header::HeaderName::from_static("x-cover-origin"),
                    handle.origin().as_str().to_string(),
                ),
            ],
            Body::from(handle.bytes().clone()),
        )
            .into_response(),
        // Redirect panics on a Location it cannot encode
        Resolution::Direct(url) if header::HeaderValue::from_str(&url).is_err() => {
            debug!(url = %url, "Direct source is not a valid Location");
            bad_request("Invalid url")
        }
        Resolution::Direct(url) => {
            debug!(url = %url, "Redirecting to direct source");
            Redirect::temporary(&url).into_response()
        }
        Resolution::NoSource => bad_request("Missing url"),
    }
}

fn bad_request(error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Warm the durable store in the background
async fn warm(State(state): State<SharedState>, Json(request): Json<WarmRequest>) -> StatusCode {
    info!(count = request.urls.len(), "Warm requested");
    state.cache.warm_in_background(request.urls);
    StatusCode::ACCEPTED
}

/// Delete the durable store
async fn invalidate(State(state): State<SharedState>) -> StatusCode {
    state.cache.invalidate().await;
    StatusCode::NO_CONTENT
}

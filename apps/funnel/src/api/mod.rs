//! # Funnel HTTP API Module
//!
//! This module implements the dashboard's HTTP API using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Cache status (last refresh, staleness, last error)
//! - `GET /funnel` - Funnel rows (filters: owner, status, pipeline_id, from, to, date_key)
//! - `GET /funnel/summary` - Stage counts and won revenue per day
//! - `GET /funnel.csv` - The funnel table as CSV
//! - `POST /refresh` - Refresh if stale (`?force=true` to always fetch)
//!
//! ## Security Configuration
//!
//! - `FUNNEL_CORS_ORIGINS` / `api.cors_origins`: allowed origins, or "*" for all (default: localhost only)
//! - `FUNNEL_API_KEY` / `api.api_key`: if set, requires Bearer token authentication

mod auth;
mod handlers;
mod types;

pub use auth::ApiKey;
pub use handlers::{
    csv_handler, funnel_handler, health_handler, refresh_handler, status_handler,
    summary_handler,
};
pub use types::{
    ErrorResponse, FunnelQuery, FunnelResponse, HealthResponse, RefreshQuery, RefreshResponse,
    StageCountJson, StatusResponse, SummaryResponse,
};

use crate::cache::RefreshCache;
use crate::config::{ApiSettings, ReportSettings};
use crate::error::AppError;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<RefreshCache>,
    pub report: Arc<ReportSettings>,
}

impl AppState {
    #[must_use]
    pub fn new(cache: Arc<RefreshCache>, report: ReportSettings) -> Self {
        Self {
            cache,
            report: Arc::new(report),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from the configured origins.
///
/// - `["*"]`: all origins (development only)
/// - empty: localhost only
/// - otherwise: the listed origins; invalid entries are logged and dropped
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => {
                tracing::info!("CORS: Allowing origin: {}", origin);
                Some(hv)
            }
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        if !origins.is_empty() {
            tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
        }
        return localhost_cors();
    }

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8501",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8501",
    ]
    .into_iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Authentication - validates API key (if configured)
pub fn create_router(state: AppState, api: &ApiSettings) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/funnel", get(handlers::funnel_handler))
        .route("/funnel/summary", get(handlers::summary_handler))
        .route("/funnel.csv", get(handlers::csv_handler))
        .route("/refresh", post(handlers::refresh_handler));

    match ApiKey::from_config(api.api_key.as_deref()) {
        Some(key) => {
            tracing::info!("API key authentication enabled");
            router = router.layer(axum_middleware::from_fn_with_state(
                key,
                auth::require_api_key,
            ));
        }
        None => tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible. \
             Set FUNNEL_API_KEY to enable authentication."
        ),
    }

    router
        .layer(build_cors_layer(&api.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the API on `addr` until Ctrl+C.
pub async fn run_server(addr: &str, state: AppState, api: &ApiSettings) -> Result<(), AppError> {
    let router = create_router(state, api);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Funnel HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Io(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

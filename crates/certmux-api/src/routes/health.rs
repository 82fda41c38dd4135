//! Health check endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::{AppState, ProxyTransport};

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub transports: usize,
}

/// Health check handler
async fn health<T: ProxyTransport>(State(state): State<AppState<T>>) -> Json<HealthResponse> {
    // Record health check metric
    metrics::counter!("certmux_health_checks_total").increment(1);

    let cache = state.dispatcher.cache();
    let status = if cache.is_disposed() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        transports: cache.len(),
    })
}

/// Create health routes
pub fn routes<T: ProxyTransport>() -> Router<AppState<T>> {
    Router::new()
        .route("/health", get(health::<T>))
        .route("/healthz", get(health::<T>))
}

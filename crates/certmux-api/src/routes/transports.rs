//! Transport management routes

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::{AppState, ProxyTransport};

/// A live cached transport
#[derive(Debug, Serialize)]
pub struct TransportEntry {
    pub identity: String,
    pub age_seconds: u64,
    pub created_at: DateTime<Utc>,
}

/// Transport cache statistics response
#[derive(Debug, Serialize)]
pub struct TransportStatsResponse {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub release_failures: u64,
}

/// GET /api/v1/transports
async fn list_transports<T: ProxyTransport>(
    State(state): State<AppState<T>>,
) -> Json<Vec<TransportEntry>> {
    let entries = state
        .dispatcher
        .cache()
        .snapshot()
        .into_iter()
        .map(|entry| TransportEntry {
            identity: entry.key,
            age_seconds: entry.age.as_secs(),
            created_at: entry.created_at,
        })
        .collect();

    Json(entries)
}

/// GET /api/v1/transports/stats
async fn transport_stats<T: ProxyTransport>(
    State(state): State<AppState<T>>,
) -> Json<TransportStatsResponse> {
    let stats = state.dispatcher.stats();

    Json(TransportStatsResponse {
        entries: stats.entries,
        capacity: stats.capacity,
        ttl_seconds: state.dispatcher.cache().ttl().as_secs(),
        hits: stats.hits,
        misses: stats.misses,
        hit_rate: stats.hit_rate(),
        evictions: stats.evictions,
        expirations: stats.expirations,
        release_failures: stats.release_failures,
    })
}

/// POST /api/v1/transports/sweep
async fn sweep_transports<T: ProxyTransport>(
    State(state): State<AppState<T>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("Sweeping expired transports");

    let count = state.dispatcher.cache().sweep()?;

    Ok(Json(serde_json::json!({
        "swept": count
    })))
}

/// DELETE /api/v1/transports
async fn clear_transports<T: ProxyTransport>(
    State(state): State<AppState<T>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("Releasing all transports");

    let count = state.dispatcher.cache().clear()?;

    Ok(Json(serde_json::json!({
        "cleared": count
    })))
}

/// DELETE /api/v1/transports/{identity}
async fn remove_transport<T: ProxyTransport>(
    State(state): State<AppState<T>>,
    Path(identity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.dispatcher.cache().remove(&identity)? {
        return Err(ApiError::NotFound(format!("No transport for {}", identity)));
    }

    info!("Released transport for {}", identity);

    Ok(Json(serde_json::json!({
        "removed": identity
    })))
}

/// Create transport management routes
pub fn routes<T: ProxyTransport>() -> Router<AppState<T>> {
    Router::new()
        .route(
            "/api/v1/transports",
            get(list_transports::<T>).delete(clear_transports::<T>),
        )
        .route("/api/v1/transports/stats", get(transport_stats::<T>))
        .route("/api/v1/transports/sweep", post(sweep_transports::<T>))
        .route("/api/v1/transports/{identity}", delete(remove_transport::<T>))
}

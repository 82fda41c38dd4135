//! API routes

mod client_cert;
mod health;
pub mod metrics;
mod transports;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::identity::resolve_identity;
use crate::state::{AppState, MetricsHandle, ProxyTransport};

pub use client_cert::{EchoCertificate, EchoInfo};
pub use transports::{TransportEntry, TransportStatsResponse};

/// Create the main router
pub fn create_router<T: ProxyTransport>(
    state: AppState<T>,
    metrics_handle: Option<Arc<MetricsHandle>>,
) -> Router {
    let dispatcher = state.dispatcher.clone();

    let mut router = Router::new()
        // Health check
        .merge(health::routes())
        // Certificate-bearing upstream calls
        .merge(client_cert::routes())
        // Transport management API
        .merge(transports::routes())
        .layer(middleware::from_fn(resolve_identity))
        .with_state(state);

    // Add metrics endpoint if handle is provided
    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle, dispatcher));
    }

    router
}

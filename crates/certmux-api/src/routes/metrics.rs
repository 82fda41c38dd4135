//! Prometheus metrics endpoint

use axum::{Router, extract::State, response::IntoResponse, routing::get};
use std::sync::Arc;

use crate::state::{MetricsHandle, ProxyDispatcher, ProxyTransport};

struct MetricsState<T> {
    handle: Arc<MetricsHandle>,
    dispatcher: Arc<ProxyDispatcher<T>>,
}

impl<T> Clone for MetricsState<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Create metrics routes with the Prometheus handle
pub fn routes<T: ProxyTransport>(
    handle: Arc<MetricsHandle>,
    dispatcher: Arc<ProxyDispatcher<T>>,
) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics::<T>))
        .with_state(MetricsState { handle, dispatcher })
}

/// Publish the transport cache counters
fn record_cache_metrics<T: ProxyTransport>(dispatcher: &ProxyDispatcher<T>) {
    let stats = dispatcher.stats();

    metrics::gauge!("certmux_transports_live").set(stats.entries as f64);
    metrics::gauge!("certmux_transports_capacity").set(stats.capacity as f64);
    metrics::counter!("certmux_transport_cache_hits_total").absolute(stats.hits);
    metrics::counter!("certmux_transport_cache_misses_total").absolute(stats.misses);
    metrics::counter!("certmux_transport_evictions_total").absolute(stats.evictions);
    metrics::counter!("certmux_transport_expirations_total").absolute(stats.expirations);
    metrics::counter!("certmux_transport_release_failures_total")
        .absolute(stats.release_failures);
}

/// GET /metrics - Prometheus metrics endpoint
async fn get_metrics<T: ProxyTransport>(State(state): State<MetricsState<T>>) -> impl IntoResponse {
    record_cache_metrics(&state.dispatcher);
    state.handle.render()
}

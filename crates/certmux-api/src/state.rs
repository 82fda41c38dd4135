//! Application state

use std::sync::Arc;

use certmux_core::{Dispatcher, Release, Transport};
use certmux_proxy::{ClientCertTransport, CredentialProvider, RequestContext};
use metrics_exporter_prometheus::PrometheusHandle;

/// Prometheus handle used to render the metrics endpoint
pub type MetricsHandle = PrometheusHandle;

/// Dispatcher routing calls to per-identity client certificate transports
pub type ProxyDispatcher<T = ClientCertTransport> = Dispatcher<T, RequestContext>;

/// Application state shared across handlers
pub struct AppState<T = ClientCertTransport> {
    pub dispatcher: Arc<ProxyDispatcher<T>>,
    pub credentials: Arc<dyn CredentialProvider>,
    /// Upstream path that echoes the presented client certificate
    pub echo_path: String,
}

impl<T> AppState<T> {
    pub fn new(
        dispatcher: Arc<ProxyDispatcher<T>>,
        credentials: Arc<dyn CredentialProvider>,
        echo_path: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            credentials,
            echo_path: echo_path.into(),
        }
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            credentials: self.credentials.clone(),
            echo_path: self.echo_path.clone(),
        }
    }
}

/// Transports the API can dispatch through
pub trait ProxyTransport: Transport<RequestContext> + Release + 'static {}

impl<T> ProxyTransport for T where T: Transport<RequestContext> + Release + 'static {}

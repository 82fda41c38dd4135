//! certmux - Identity-keyed client certificate proxy

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use certmux_api::{AppState, ProxyDispatcher, create_router};
use certmux_proxy::{
    ClientCertTransport, CredentialProvider, PemDirectoryProvider, RequestContext,
    TransportConfig,
};
use config::{Config, LoggingConfig};

/// certmux - Forward calls upstream with a client certificate per caller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "CERTMUX_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "CERTMUX_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting certmux v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    // Client certificates, one PEM bundle per identity
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(PemDirectoryProvider::new(&config.credentials.dir));

    let transport_config = TransportConfig {
        base_url: config.upstream_url()?,
        client_name: config.upstream.client_name.clone(),
        skip_tls_verify: config.upstream.skip_tls_verify,
        pool_idle_timeout: Duration::from_secs(config.upstream.pool_idle_timeout_secs),
    };

    // One transport per identity, created on first use
    let factory_credentials = credentials.clone();
    let dispatcher: Arc<ProxyDispatcher> = Arc::new(ProxyDispatcher::<ClientCertTransport>::new(
        &config.cache.to_cache_config(),
        move |identity: &str, _context: &RequestContext| {
            let credential = factory_credentials.credential(identity)?;
            Ok(ClientCertTransport::new(
                identity,
                &credential,
                &transport_config,
            )?)
        },
    )?);

    // Create application state
    let state = AppState::new(
        dispatcher.clone(),
        credentials,
        config.upstream.echo_path.clone(),
    );

    // Create router
    let app = create_router(state, Some(Arc::new(metrics_handle)))
        .layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);
    info!("Upstream: {}", config.upstream.url);
    info!(
        "Transport cache: capacity {}, ttl {}s",
        config.cache.capacity, config.cache.ttl_secs
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release every cached transport before exiting
    if let Err(e) = dispatcher.dispose() {
        warn!("Failed to release transports on shutdown: {}", e);
    }

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

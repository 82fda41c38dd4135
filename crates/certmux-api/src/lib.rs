//! certmux HTTP API
//!
//! This crate provides the Axum-based HTTP surface: the client
//! certificate endpoint that forwards calls through the per-identity
//! dispatcher, the transport management API, health and metrics.

pub mod error;
pub mod identity;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use identity::{RequireUser, UserContext};
pub use routes::create_router;
pub use state::{AppState, MetricsHandle, ProxyDispatcher, ProxyTransport};

//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use certmux_core::{CacheError, DispatchError};
use certmux_proxy::ProxyError;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Certificate mismatch: {0}")]
    CertificateMismatch(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl<E> From<DispatchError<E>> for ApiError
where
    E: std::error::Error + 'static,
{
    fn from(err: DispatchError<E>) -> Self {
        match err {
            DispatchError::MissingIdentity | DispatchError::MissingContext => {
                ApiError::Unauthorized(err.to_string())
            }
            DispatchError::Cache(e) => ApiError::Cache(e),
            DispatchError::Transport(e) => ApiError::Upstream(e.to_string()),
        }
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::CertificateMismatch(msg) => {
                (StatusCode::BAD_REQUEST, "CERTIFICATE_MISMATCH", msg.clone())
            }
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg.clone()),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg.clone())
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            ApiError::Proxy(e) => match e {
                ProxyError::CredentialNotFound(who) => (
                    StatusCode::NOT_FOUND,
                    "CREDENTIAL_NOT_FOUND",
                    format!("No client certificate for {}", who),
                ),
                ProxyError::InvalidIdentity(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_IDENTITY", e.to_string())
                }
                ProxyError::InvalidCredential(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INVALID_CREDENTIAL",
                    e.to_string(),
                ),
                _ => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", e.to_string()),
            },
            ApiError::Cache(e) => match e {
                CacheError::Disposed => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SHUTTING_DOWN",
                    e.to_string(),
                ),
                CacheError::Factory { .. } => {
                    (StatusCode::BAD_GATEWAY, "TRANSPORT_CREATION_FAILED", e.to_string())
                }
                CacheError::Release { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "RELEASE_FAILED",
                    e.to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    e.to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, message);
        }

        let body = axum::Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

//! Proxy error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Transport has been released")]
    Released,

    #[error("Call cancelled")]
    Cancelled,

    #[error("No async runtime available to drive the transport")]
    NoRuntime,

    #[error("Blocking send called from a current-thread runtime; use send_async")]
    BlockingInRuntime,
}

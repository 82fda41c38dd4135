//! certmux upstream transport
//!
//! This crate provides the per-identity HTTP transport that presents a
//! TLS client certificate to the upstream service, and the credential
//! provider that supplies those certificates.

pub mod client;
pub mod context;
pub mod credentials;
pub mod error;

pub use client::{ClientCertTransport, TransportConfig};
pub use context::RequestContext;
pub use credentials::{Credential, CredentialProvider, PemDirectoryProvider};
pub use error::ProxyError;

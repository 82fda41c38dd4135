//! Client certificate echo route
//!
//! Forwards a GET to the upstream echo endpoint through the transport
//! cached for the caller, and checks that the upstream saw the
//! certificate issued to that caller.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header::USER_AGENT},
    routing::get,
};
use bytes::Bytes;
use certmux_core::{Call, CallScope, Transport};
use certmux_proxy::RequestContext;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::identity::RequireUser;
use crate::state::{AppState, ProxyTransport};

/// Certificate details reported by the echo endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoCertificate {
    #[serde(default)]
    pub subject: Option<String>,
    pub thumbprint: String,
}

/// What the upstream echo endpoint saw
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoInfo {
    #[serde(default)]
    pub client_certificate: Option<EchoCertificate>,
    #[serde(default)]
    pub source_user_agent: Option<String>,
    #[serde(default)]
    pub source_user_context: Option<String>,
    #[serde(default)]
    pub http_client: Option<String>,
    #[serde(default)]
    pub handler_id: Option<String>,
    #[serde(default)]
    pub handler_request_no: Option<i64>,
}

impl EchoInfo {
    /// Check the echoed certificate against the one presented.
    ///
    /// The subject is compared only when both sides know it.
    fn verify(&self, thumbprint: &str, subject: Option<&str>) -> Result<(), ApiError> {
        let certificate = self.client_certificate.as_ref().ok_or_else(|| {
            ApiError::CertificateMismatch("Upstream saw no client certificate".to_string())
        })?;

        if !certificate.thumbprint.eq_ignore_ascii_case(thumbprint) {
            return Err(ApiError::CertificateMismatch(format!(
                "Upstream saw certificate {} but {} was presented",
                certificate.thumbprint, thumbprint
            )));
        }

        if let (Some(seen), Some(expected)) = (certificate.subject.as_deref(), subject) {
            if normalize_subject(seen) != normalize_subject(expected) {
                return Err(ApiError::CertificateMismatch(format!(
                    "Upstream saw subject {:?} but {:?} was presented",
                    seen, expected
                )));
            }
        }

        Ok(())
    }
}

/// Reduce a distinguished name to a sorted list of lower-case RDNs.
///
/// Servers differ in RDN order and in a few attribute short names.
fn normalize_subject(subject: &str) -> Vec<String> {
    let mut rdns: Vec<String> = subject
        .split([',', ';'])
        .map(str::trim)
        .filter(|rdn| !rdn.is_empty())
        .map(|rdn| match rdn.split_once('=') {
            Some((name, value)) => {
                let name = match name.trim().to_ascii_lowercase().as_str() {
                    "s" => "st".to_string(),
                    "e" | "emailaddress" => "email".to_string(),
                    other => other.to_string(),
                };
                format!("{}={}", name, value.trim().to_lowercase())
            }
            None => rdn.to_lowercase(),
        })
        .collect();
    rdns.sort();
    rdns
}

/// GET /client-cert
async fn client_cert<T: ProxyTransport>(
    State(state): State<AppState<T>>,
    RequireUser(user): RequireUser,
    headers: HeaderMap,
) -> Result<Json<EchoInfo>, ApiError> {
    let credential = state.credentials.credential(&user.user_id).inspect_err(|e| {
        debug!("No usable credential for {}: {}", user.user_id, e);
        metrics::counter!("certmux_client_cert_requests_total", "outcome" => "credential_error")
            .increment(1);
    })?;

    let context = Arc::new(RequestContext {
        user_id: user.user_id.clone(),
        user_name: user.user_name.clone(),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        credential_thumbprint: Some(credential.thumbprint().to_string()),
    });

    let request = http::Request::get(state.echo_path.as_str())
        .body(Bytes::new())
        .map_err(|e| ApiError::Internal(format!("Invalid echo path: {}", e)))?;

    // Cancel the upstream call if the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let call = Call::new(request, CallScope::new(user.user_id.clone(), context))
        .with_cancellation(cancel);

    debug!("Forwarding echo request for {}", user.user_id);
    let reply = state.dispatcher.send_async(call).await.inspect_err(|_| {
        metrics::counter!("certmux_client_cert_requests_total", "outcome" => "error").increment(1);
    })?;

    if !reply.status().is_success() {
        metrics::counter!("certmux_client_cert_requests_total", "outcome" => "error").increment(1);
        return Err(ApiError::Upstream(format!(
            "Echo endpoint returned {}",
            reply.status()
        )));
    }

    let echo: EchoInfo = serde_json::from_slice(reply.body())
        .map_err(|e| ApiError::Upstream(format!("Invalid echo response: {}", e)))?;

    if let Err(e) = echo.verify(credential.thumbprint(), credential.subject()) {
        warn!("Certificate mismatch for {}: {}", user.user_id, e);
        metrics::counter!("certmux_client_cert_requests_total", "outcome" => "mismatch")
            .increment(1);
        return Err(e);
    }

    info!(
        "Echo for {} handled by {}",
        user.user_id,
        echo.handler_id.as_deref().unwrap_or("unknown handler")
    );
    metrics::counter!("certmux_client_cert_requests_total", "outcome" => "ok").increment(1);

    Ok(Json(echo))
}

/// Create client certificate routes
pub fn routes<T: ProxyTransport>() -> Router<AppState<T>> {
    Router::new().route("/client-cert", get(client_cert::<T>))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(thumbprint: Option<&str>) -> EchoInfo {
        EchoInfo {
            client_certificate: thumbprint.map(|t| EchoCertificate {
                subject: Some("CN=alice, O=Example, C=US".to_string()),
                thumbprint: t.to_string(),
            }),
            source_user_agent: None,
            source_user_context: None,
            http_client: None,
            handler_id: None,
            handler_request_no: None,
        }
    }

    #[test]
    fn test_verify_ignores_case() {
        assert!(echo(Some("ABCDEF")).verify("abcdef", None).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_certificate() {
        let err = echo(Some("0011")).verify("abcdef", None).unwrap_err();
        assert!(matches!(err, ApiError::CertificateMismatch(_)));
    }

    #[test]
    fn test_verify_requires_certificate() {
        let err = echo(None).verify("abcdef", None).unwrap_err();
        assert!(matches!(err, ApiError::CertificateMismatch(_)));
    }

    #[test]
    fn test_verify_matching_subject() {
        let echo = echo(Some("ABCDEF"));
        assert!(echo.verify("ABCDEF", Some("CN=alice, O=Example, C=US")).is_ok());
    }

    #[test]
    fn test_verify_subject_in_other_order() {
        let echo = echo(Some("ABCDEF"));
        assert!(echo.verify("ABCDEF", Some("C=US, O=Example, CN=alice")).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_subject() {
        let err = echo(Some("ABCDEF"))
            .verify("ABCDEF", Some("CN=mallory, O=Example, C=US"))
            .unwrap_err();
        assert!(matches!(err, ApiError::CertificateMismatch(_)));
    }

    #[test]
    fn test_verify_skips_unknown_subject() {
        let mut echo = echo(Some("ABCDEF"));
        assert!(echo.verify("ABCDEF", None).is_ok());

        if let Some(certificate) = echo.client_certificate.as_mut() {
            certificate.subject = None;
        }
        assert!(echo.verify("ABCDEF", Some("CN=alice")).is_ok());
    }

    #[test]
    fn test_normalize_subject_aliases() {
        assert_eq!(
            normalize_subject("E=a@example.com, S=Berlin, CN=Alice"),
            normalize_subject("CN=alice, ST=Berlin, Email=a@example.com")
        );
    }

    #[test]
    fn test_parse_camel_case_echo() {
        let body = r#"{
            "clientCertificate": { "subject": "CN=alice", "thumbprint": "AB12" },
            "sourceUserAgent": "curl/8.0",
            "sourceUserContext": "UserId=alice;UserName=ALICE;Cert=AB12",
            "httpClient": "Name=certmux;Strategy=Multi-Handler",
            "handlerId": "42",
            "handlerRequestNo": 3
        }"#;
        let echo: EchoInfo = serde_json::from_str(body).unwrap();
        assert_eq!(echo.source_user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(echo.handler_request_no, Some(3));
        assert!(echo.verify("ab12", Some("CN=alice")).is_ok());
    }

    #[test]
    fn test_parse_echo_without_handler() {
        let body = r#"{
            "clientCertificate": { "subject": "CN=alice", "thumbprint": "AB12" },
            "sourceUserAgent": "curl/8.0",
            "sourceUserContext": "UserId=alice;UserName=ALICE;Cert=AB12",
            "httpClient": "Name=certmux;Strategy=Multi-Handler",
            "handlerId": null,
            "handlerRequestNo": -1
        }"#;
        let echo: EchoInfo = serde_json::from_str(body).unwrap();
        assert_eq!(echo.handler_id, None);
        assert_eq!(echo.handler_request_no, Some(-1));
    }
}

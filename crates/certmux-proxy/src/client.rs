//! Per-identity upstream transport

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use certmux_core::{BoxError, Call, CallScope, Release, Reply, Transport};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response, Uri};
use parking_lot::RwLock;
use reqwest::Client;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::credentials::Credential;
use crate::error::ProxyError;

const HTTP_CLIENT_HEADER: HeaderName = HeaderName::from_static("x-httpclient");
const SOURCE_USER_CONTEXT_HEADER: HeaderName = HeaderName::from_static("x-sourceusercontext");
const SOURCE_USER_AGENT_HEADER: HeaderName = HeaderName::from_static("x-sourceuseragent");
const HANDLER_ID_HEADER: HeaderName = HeaderName::from_static("x-handlerid");
const HANDLER_REQUEST_NO_HEADER: HeaderName = HeaderName::from_static("x-handlerrequestno");

/// Settings shared by every transport the proxy creates
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Base URL that relative request URIs are resolved against
    pub base_url: Url,
    /// Name advertised to the upstream in the client header
    pub client_name: String,
    /// Skip TLS certificate verification of the upstream
    pub skip_tls_verify: bool,
    /// How long idle pooled connections are kept
    pub pool_idle_timeout: Duration,
}

/// HTTP transport presenting one identity's client certificate.
///
/// Each transport owns its own connection pool, so connections opened
/// with one certificate are never reused for another identity.
pub struct ClientCertTransport {
    identity: String,
    thumbprint: String,
    handler_id: Uuid,
    base_url: Url,
    client: RwLock<Option<Client>>,
    requests: AtomicU64,
    runtime: Option<Handle>,
}

impl ClientCertTransport {
    /// Build a transport for `identity` using its credential
    pub fn new(
        identity: &str,
        credential: &Credential,
        config: &TransportConfig,
    ) -> Result<Self, ProxyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HTTP_CLIENT_HEADER,
            HeaderValue::from_str(&client_descriptor(&config.client_name))?,
        );

        let mut builder = Client::builder()
            .use_rustls_tls()
            .identity(credential.identity()?)
            .default_headers(headers)
            .pool_idle_timeout(config.pool_idle_timeout);

        if config.skip_tls_verify {
            warn!("TLS verification disabled for upstream {}", config.base_url);
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        let transport = Self::with_client(
            identity,
            credential.thumbprint(),
            config.base_url.clone(),
            client,
        );

        info!(
            "Created transport {} for {} ({})",
            transport.handler_id, identity, transport.thumbprint
        );

        Ok(transport)
    }

    pub(crate) fn with_client(identity: &str, thumbprint: &str, base_url: Url, client: Client) -> Self {
        Self {
            identity: identity.to_string(),
            thumbprint: thumbprint.to_string(),
            handler_id: Uuid::new_v4(),
            base_url,
            client: RwLock::new(Some(client)),
            requests: AtomicU64::new(0),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Thumbprint of the certificate this transport presents
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn handler_id(&self) -> Uuid {
        self.handler_id
    }

    /// Number of requests sent through this transport
    pub fn requests_sent(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.client.read().is_none()
    }

    fn client(&self) -> Result<Client, ProxyError> {
        self.client.read().clone().ok_or(ProxyError::Released)
    }

    fn prepare(
        &self,
        client: &Client,
        request: Request<Bytes>,
        scope: &CallScope<RequestContext>,
    ) -> Result<reqwest::Request, ProxyError> {
        let (parts, body) = request.into_parts();
        let url = resolve_url(&self.base_url, &parts.uri)?;

        let request_no = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let mut headers = parts.headers;
        decorate_headers(&mut headers, scope.context().map(|c| c.as_ref()), self.handler_id, request_no)?;

        debug!(
            "Sending {} {} for {} (request {})",
            parts.method, url, self.identity, request_no
        );

        Ok(client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .build()?)
    }
}

/// Value of the client header sent with every request
fn client_descriptor(client_name: &str) -> String {
    format!("Name={};Strategy=Multi-Handler", client_name)
}

/// Resolve a request URI against the upstream base URL
pub(crate) fn resolve_url(base: &Url, uri: &Uri) -> Result<Url, ProxyError> {
    if uri.scheme().is_some() {
        return Ok(Url::parse(&uri.to_string())?);
    }

    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    Ok(base.join(path)?)
}

/// Add the diagnostic headers describing the caller and this transport
pub(crate) fn decorate_headers(
    headers: &mut HeaderMap,
    context: Option<&RequestContext>,
    handler_id: Uuid,
    request_no: u64,
) -> Result<(), ProxyError> {
    if let Some(context) = context {
        headers.insert(
            SOURCE_USER_CONTEXT_HEADER,
            HeaderValue::from_str(&context.describe())?,
        );
        if let Some(user_agent) = &context.user_agent {
            headers.insert(SOURCE_USER_AGENT_HEADER, HeaderValue::from_str(user_agent)?);
        }
    }

    headers.insert(
        HANDLER_ID_HEADER,
        HeaderValue::from_str(&handler_id.to_string())?,
    );
    headers.insert(HANDLER_REQUEST_NO_HEADER, HeaderValue::from(request_no));

    Ok(())
}

async fn execute(client: Client, request: reqwest::Request) -> Result<Reply, ProxyError> {
    let response = client.execute(request).await?;

    let status = response.status();
    let version = response.version();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    let mut reply = Response::new(body);
    *reply.status_mut() = status;
    *reply.version_mut() = version;
    *reply.headers_mut() = headers;

    Ok(reply)
}

#[async_trait]
impl Transport<RequestContext> for ClientCertTransport {
    type Error = ProxyError;

    /// Blocks until the call completes.
    ///
    /// Inside a multi-threaded runtime the current worker is handed over
    /// with `block_in_place`. A current-thread runtime cannot be blocked
    /// without stalling its own I/O, so the call is refused there. Outside
    /// any runtime the one the transport was created in drives the call.
    fn send(&self, call: Call<RequestContext>) -> Result<Reply, ProxyError> {
        if let Ok(current) = Handle::try_current() {
            return match current.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(ProxyError::BlockingInRuntime),
                _ => tokio::task::block_in_place(|| current.block_on(self.send_async(call))),
            };
        }

        let runtime = self.runtime.clone().ok_or(ProxyError::NoRuntime)?;
        runtime.block_on(self.send_async(call))
    }

    async fn send_async(&self, call: Call<RequestContext>) -> Result<Reply, ProxyError> {
        let Call {
            request,
            scope,
            cancel,
        } = call;

        if cancel.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }

        let client = self.client()?;
        let request = self.prepare(&client, request, &scope)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Call for {} cancelled in flight", self.identity);
                Err(ProxyError::Cancelled)
            }
            result = execute(client, request) => result,
        }
    }
}

impl Release for ClientCertTransport {
    fn release(&self) -> Result<(), BoxError> {
        match self.client.write().take() {
            Some(_) => {
                info!(
                    "Released transport {} for {} after {} requests",
                    self.handler_id,
                    self.identity,
                    self.requests_sent()
                );
                Ok(())
            }
            None => Err(ProxyError::Released.into()),
        }
    }
}

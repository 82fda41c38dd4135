//! Dispatcher routing calls to per-identity transports
//!
//! The dispatcher is itself a [`Transport`]. For every call it reads
//! the caller identity and ambient context from the call scope, resolves
//! the inner transport cached for that identity (creating it on first
//! use) and forwards the call untouched.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::call::{Call, Reply};
use super::transport::Transport;
use crate::cache::{CacheConfig, CacheStats, ExpiringFactory, Release};
use crate::error::{BoxError, CacheError};

#[derive(Error, Debug)]
pub enum DispatchError<E>
where
    E: std::error::Error + 'static,
{
    #[error("Call has no caller identity")]
    MissingIdentity,

    #[error("Call has no request context")]
    MissingContext,

    #[error("Transport cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transport(E),
}

impl<E> DispatchError<E>
where
    E: std::error::Error + 'static,
{
    /// Whether the call was rejected before any transport was resolved
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DispatchError::MissingIdentity | DispatchError::MissingContext
        )
    }
}

/// Routes calls to a lazily created transport per caller identity
pub struct Dispatcher<T, C> {
    transports: ExpiringFactory<T, C>,
}

impl<T, C> Dispatcher<T, C>
where
    T: Transport<C> + Release,
    C: Send + Sync + 'static,
{
    /// Create a dispatcher whose transports are built by `factory`
    pub fn new<F>(config: &CacheConfig, factory: F) -> Result<Self, CacheError>
    where
        F: Fn(&str, &C) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Ok(Self::from_cache(ExpiringFactory::with_config(config, factory)?))
    }

    /// Create a dispatcher over an existing transport cache
    pub fn from_cache(transports: ExpiringFactory<T, C>) -> Self {
        Self { transports }
    }

    /// The underlying transport cache
    pub fn cache(&self) -> &ExpiringFactory<T, C> {
        &self.transports
    }

    pub fn stats(&self) -> CacheStats {
        self.transports.stats()
    }

    /// Release every cached transport
    pub fn dispose(&self) -> Result<(), CacheError> {
        self.transports.dispose()
    }

    /// Resolve the transport for a call without sending it
    pub fn resolve(&self, call: &Call<C>) -> Result<Arc<T>, DispatchError<T::Error>> {
        let identity = call
            .scope
            .identity()
            .ok_or(DispatchError::MissingIdentity)?;
        let context = call.scope.context().ok_or(DispatchError::MissingContext)?;

        debug!("Dispatching {} {} for {}", call.request.method(), call.request.uri(), identity);
        Ok(self.transports.get_or_create(identity, context)?)
    }
}

#[async_trait]
impl<T, C> Transport<C> for Dispatcher<T, C>
where
    T: Transport<C> + Release,
    C: Send + Sync + 'static,
{
    type Error = DispatchError<T::Error>;

    fn send(&self, call: Call<C>) -> Result<Reply, Self::Error> {
        let transport = self.resolve(&call)?;
        transport.send(call).map_err(DispatchError::Transport)
    }

    async fn send_async(&self, call: Call<C>) -> Result<Reply, Self::Error> {
        let transport = self.resolve(&call)?;
        transport
            .send_async(call)
            .await
            .map_err(DispatchError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CallScope;
    use bytes::Bytes;
    use http::{Request, Response, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Error, Debug)]
    #[error("upstream refused: {0}")]
    struct EchoError(String);

    struct Session {
        tenant: String,
    }

    struct EchoTransport {
        identity: String,
        released: AtomicUsize,
    }

    impl Release for EchoTransport {
        fn release(&self) -> Result<(), BoxError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl EchoTransport {
        fn answer(&self, call: Call<Session>) -> Result<Reply, EchoError> {
            if call.request.uri().path() == "/fail" {
                return Err(EchoError(self.identity.clone()));
            }
            let tenant = call.scope.context().map(|c| c.tenant.clone()).unwrap_or_default();
            let body = format!("{}@{}", self.identity, tenant);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Bytes::from(body))
                .unwrap())
        }
    }

    #[async_trait]
    impl Transport<Session> for EchoTransport {
        type Error = EchoError;

        fn send(&self, call: Call<Session>) -> Result<Reply, EchoError> {
            self.answer(call)
        }

        async fn send_async(&self, call: Call<Session>) -> Result<Reply, EchoError> {
            self.answer(call)
        }
    }

    fn dispatcher(created: Arc<AtomicUsize>) -> Dispatcher<EchoTransport, Session> {
        let config = CacheConfig {
            capacity: 4,
            ttl: Duration::from_secs(60),
        };
        Dispatcher::new(&config, move |identity: &str, _session: &Session| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(EchoTransport {
                identity: identity.to_string(),
                released: AtomicUsize::new(0),
            })
        })
        .unwrap()
    }

    fn call(path: &str, scope: CallScope<Session>) -> Call<Session> {
        Call::new(
            Request::get(path).body(Bytes::new()).unwrap(),
            scope,
        )
    }

    fn session(tenant: &str) -> Arc<Session> {
        Arc::new(Session {
            tenant: tenant.to_string(),
        })
    }

    #[tokio::test]
    async fn test_forwards_to_identity_transport() {
        let created = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(created.clone());

        let reply = dispatcher
            .send_async(call("/echo", CallScope::new("alice", session("blue"))))
            .await
            .unwrap();
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(reply.body(), &Bytes::from("alice@blue"));
    }

    #[tokio::test]
    async fn test_same_identity_shares_transport() {
        let created = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(created.clone());

        let first = dispatcher
            .resolve(&call("/", CallScope::new("alice", session("a"))))
            .unwrap();
        let second = dispatcher
            .resolve(&call("/", CallScope::new("alice", session("b"))))
            .unwrap();
        let other = dispatcher
            .resolve(&call("/", CallScope::new("bob", session("a"))))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let created = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(created.clone());

        let err = dispatcher
            .send_async(call("/", CallScope::empty().with_context(session("a"))))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingIdentity));
        assert!(err.is_precondition());
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert!(dispatcher.cache().is_empty());
    }

    #[test]
    fn test_missing_context_is_rejected() {
        let created = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(created.clone());

        let err = dispatcher
            .send(call("/", CallScope::empty().with_identity("alice")))
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingContext));
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blocking_shape_routes_the_same_way() {
        let created = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(created.clone());

        let reply = dispatcher
            .send(call("/echo", CallScope::new("carol", session("green"))))
            .unwrap();
        assert_eq!(reply.body(), &Bytes::from("carol@green"));
    }

    #[tokio::test]
    async fn test_transport_error_passes_through() {
        let created = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(created.clone());

        let err = dispatcher
            .send_async(call("/fail", CallScope::new("alice", session("a"))))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream refused: alice");
        assert!(matches!(err, DispatchError::Transport(EchoError(ref who)) if who == "alice"));
    }

    #[tokio::test]
    async fn test_factory_error_surfaces() {
        let config = CacheConfig::default();
        let dispatcher: Dispatcher<EchoTransport, Session> =
            Dispatcher::new(&config, |identity: &str, _: &Session| {
                Err(format!("no certificate for {}", identity).into())
            })
            .unwrap();

        let err = dispatcher
            .send_async(call("/", CallScope::new("mallory", session("a"))))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cache(CacheError::Factory { .. })));
        assert!(dispatcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_dispose_releases_transports() {
        let created = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(created.clone());
        let alice = dispatcher
            .resolve(&call("/", CallScope::new("alice", session("a"))))
            .unwrap();

        dispatcher.dispose().unwrap();
        assert_eq!(alice.released.load(Ordering::SeqCst), 1);

        let err = dispatcher
            .send_async(call("/", CallScope::new("alice", session("a"))))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cache(CacheError::Disposed)));
    }
}

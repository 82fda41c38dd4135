//! Call and scope types passed through a transport

use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use tokio_util::sync::CancellationToken;

/// Response produced by a transport
pub type Reply = Response<Bytes>;

/// Caller identity and ambient context attached to a call.
///
/// Both parts are optional at construction so that a dispatcher can
/// reject incomplete calls instead of the type system hiding them.
pub struct CallScope<C> {
    identity: Option<String>,
    context: Option<Arc<C>>,
}

impl<C> CallScope<C> {
    /// Create a complete scope
    pub fn new(identity: impl Into<String>, context: Arc<C>) -> Self {
        Self {
            identity: Some(identity.into()),
            context: Some(context),
        }
    }

    /// Create a scope with neither identity nor context
    pub fn empty() -> Self {
        Self {
            identity: None,
            context: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_context(mut self, context: Arc<C>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn context(&self) -> Option<&Arc<C>> {
        self.context.as_ref()
    }
}

impl<C> Default for CallScope<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C> Clone for CallScope<C> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            context: self.context.clone(),
        }
    }
}

impl<C> std::fmt::Debug for CallScope<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallScope")
            .field("identity", &self.identity)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// A single outbound call
#[derive(Debug)]
pub struct Call<C> {
    pub request: Request<Bytes>,
    pub scope: CallScope<C>,
    /// Cancelling this token aborts the call in flight
    pub cancel: CancellationToken,
}

impl<C> Call<C> {
    pub fn new(request: Request<Bytes>, scope: CallScope<C>) -> Self {
        Self {
            request,
            scope,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

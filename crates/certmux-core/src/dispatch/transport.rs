//! Transport trait

use async_trait::async_trait;

use super::call::{Call, Reply};

/// Something that can carry a call and produce a reply.
///
/// Both call shapes must behave identically apart from how the caller
/// waits. The blocking shape is meant for threads outside the async
/// runtime's workers (for example `spawn_blocking`).
#[async_trait]
pub trait Transport<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a call, blocking the current thread until it completes
    fn send(&self, call: Call<C>) -> Result<Reply, Self::Error>;

    /// Send a call without blocking
    async fn send_async(&self, call: Call<C>) -> Result<Reply, Self::Error>;
}

//! certmux core
//!
//! This crate provides the identity-keyed transport cache: a bounded
//! recency store with ownership-aware eviction, a lazily swept TTL
//! factory on top of it, and the dispatcher that routes each call to
//! the transport cached for its caller identity.

pub mod cache;
pub mod dispatch;
pub mod error;

pub use cache::{
    CacheConfig, CacheStats, EntrySnapshot, ExpiringFactory, RecencyStore, Release,
};
pub use dispatch::{Call, CallScope, DispatchError, Dispatcher, Reply, Transport};
pub use error::{BoxError, CacheError, ReleaseError};

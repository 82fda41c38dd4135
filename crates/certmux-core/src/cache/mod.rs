//! Transport cache module

mod expiring;
mod recency;

pub use expiring::{CacheConfig, CacheStats, EntrySnapshot, ExpiringFactory, Factory};
pub use recency::{RecencyStore, Release};

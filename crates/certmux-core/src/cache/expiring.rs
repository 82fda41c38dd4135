//! Expiring get-or-create cache
//!
//! Wraps a [`RecencyStore`] with per-entry creation timestamps and a
//! memoizing factory. Expired entries are swept lazily: a call that
//! arrives more than one TTL after the previous sweep removes every
//! entry older than the TTL before doing its own lookup.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::recency::{RecencyStore, Release};
use crate::error::{BoxError, CacheError};

/// Configuration for an expiring cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached values
    pub capacity: usize,
    /// Lifetime of a cached value, measured from its creation
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            ttl: Duration::from_secs(120),
        }
    }
}

/// Point-in-time counters for an expiring cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub release_failures: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Description of a live entry, as returned by [`ExpiringFactory::snapshot`]
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub key: String,
    pub age: Duration,
    pub created_at: DateTime<Utc>,
}

/// Factory signature: builds the value for a key from the call context
pub type Factory<V, C> = dyn Fn(&str, &C) -> Result<V, BoxError> + Send + Sync;

struct Entry<V> {
    value: Arc<V>,
    created_at: Instant,
    created_wall: DateTime<Utc>,
}

impl<V: Release> Release for Entry<V> {
    fn release(&self) -> Result<(), BoxError> {
        self.value.release()
    }
}

struct State<V> {
    /// `None` once the cache has been disposed
    store: Option<RecencyStore<String, Entry<V>>>,
    last_sweep: Instant,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    release_failures: AtomicU64,
}

/// Thread-safe memoizing cache with LRU bounds and lazy TTL sweeping
pub struct ExpiringFactory<V, C> {
    factory: Box<Factory<V, C>>,
    ttl: Duration,
    capacity: usize,
    state: Mutex<State<V>>,
    /// Per-key gates serializing construction of the same key
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    counters: Counters,
}

impl<V, C> ExpiringFactory<V, C>
where
    V: Release + Send + Sync,
{
    /// Create a new cache
    pub fn new<F>(capacity: NonZeroUsize, ttl: Duration, factory: F) -> Self
    where
        F: Fn(&str, &C) -> Result<V, BoxError> + Send + Sync + 'static,
    {
        info!(
            "Initializing expiring cache (capacity: {}, ttl: {:?})",
            capacity, ttl
        );

        Self {
            factory: Box::new(factory),
            ttl,
            capacity: capacity.get(),
            state: Mutex::new(State {
                store: Some(RecencyStore::owning(capacity)),
                last_sweep: Instant::now(),
            }),
            creating: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Create a new cache from a configuration, validating it first
    pub fn with_config<F>(config: &CacheConfig, factory: F) -> Result<Self, CacheError>
    where
        F: Fn(&str, &C) -> Result<V, BoxError> + Send + Sync + 'static,
    {
        let capacity = NonZeroUsize::new(config.capacity).ok_or(CacheError::InvalidCapacity)?;
        if config.ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        Ok(Self::new(capacity, config.ttl, factory))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the cached value for `key`, creating it on a miss.
    ///
    /// The factory runs at most once per cache entry lifetime and never
    /// concurrently for the same key. It runs outside the cache-wide
    /// lock, so slow construction does not block other keys. A failed
    /// construction caches nothing.
    pub fn get_or_create(&self, key: &str, context: &C) -> Result<Arc<V>, CacheError> {
        if let Some(value) = self.lookup(key, true)? {
            return Ok(value);
        }

        let gate = CreationGate::enter(&self.creating, key);
        let _creating = gate.lock();
        self.create(key, context)
    }

    /// Force an expiry pass, returning the number of entries removed
    pub fn sweep(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.last_sweep = now;
        let store = state.store.as_mut().ok_or(CacheError::Disposed)?;
        let result = Self::remove_expired(store, now, self.ttl);
        self.record_expired(&result);
        result
    }

    /// Remove a single entry, releasing its value
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut state = self.state.lock();
        let store = state.store.as_mut().ok_or(CacheError::Disposed)?;
        store.remove(key)
    }

    /// Remove every entry, releasing all values
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut state = self.state.lock();
        let store = state.store.as_mut().ok_or(CacheError::Disposed)?;
        let removed = store.clear()?;
        info!("Cleared {} cached entries", removed);
        Ok(removed)
    }

    /// Release every cached value. Later operations fail with
    /// [`CacheError::Disposed`].
    pub fn dispose(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        match state.store.take() {
            Some(store) => {
                info!("Disposing expiring cache with {} entries", store.len());
                store.dispose()
            }
            None => Ok(()),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().store.is_none()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .store
            .as_ref()
            .map(|store| store.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            release_failures: self.counters.release_failures.load(Ordering::Relaxed),
        }
    }

    /// List live entries from most to least recently used without
    /// promoting any of them
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let now = Instant::now();
        let state = self.state.lock();
        let Some(store) = state.store.as_ref() else {
            return Vec::new();
        };

        store
            .iter()
            .map(|(key, entry)| EntrySnapshot {
                key: key.clone(),
                age: now.saturating_duration_since(entry.created_at),
                created_at: entry.created_wall,
            })
            .collect()
    }

    /// Sweep if due, then look the key up under the cache-wide lock
    fn lookup(&self, key: &str, sweep: bool) -> Result<Option<Arc<V>>, CacheError> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if sweep && now.saturating_duration_since(state.last_sweep) > self.ttl {
            state.last_sweep = now;
            if let Some(store) = state.store.as_mut() {
                let result = Self::remove_expired(store, now, self.ttl);
                self.record_expired(&result);
            }
        }

        let store = state.store.as_mut().ok_or(CacheError::Disposed)?;
        match store.try_get(key) {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    /// Build and insert the value; the caller holds the key's creation gate
    fn create(&self, key: &str, context: &C) -> Result<Arc<V>, CacheError> {
        // Another caller may have finished creating it while we waited.
        if let Some(value) = self.lookup(key, false)? {
            return Ok(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Creating cached value for key {}", key);

        let value = (self.factory)(key, context).map_err(|source| CacheError::Factory {
            key: key.to_string(),
            source,
        })?;
        let value = Arc::new(value);

        let mut state = self.state.lock();
        let Some(store) = state.store.as_mut() else {
            if let Err(e) = value.release() {
                warn!("Failed to release value created after dispose for {}: {}", key, e);
            }
            return Err(CacheError::Disposed);
        };

        let entry = Entry {
            value: value.clone(),
            created_at: Instant::now(),
            created_wall: Utc::now(),
        };
        let result = store.add(key.to_string(), entry);
        match result {
            Ok(Some(evicted)) => {
                debug!("Evicted {} to make room for {}", evicted, key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {}
            Err(e) => {
                // The key was absent, so anything displaced was an eviction.
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                self.record_failures(&e);
            }
        }

        Ok(value)
    }

    fn remove_expired(
        store: &mut RecencyStore<String, Entry<V>>,
        now: Instant,
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        store.remove_where(|entry| now.saturating_duration_since(entry.created_at) > ttl)
    }

    fn record_expired(&self, result: &Result<usize, CacheError>) {
        let removed = match result {
            Ok(removed) => *removed,
            Err(CacheError::Release { removed, .. }) => *removed,
            Err(_) => 0,
        };
        if removed > 0 {
            debug!("Swept {} expired entries", removed);
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        if let Err(e) = result {
            self.record_failures(e);
        }
    }

    fn record_failures(&self, error: &CacheError) {
        if let CacheError::Release { failures, .. } = error {
            self.counters
                .release_failures
                .fetch_add(failures.len() as u64, Ordering::Relaxed);
            for failure in failures {
                warn!("{}", failure);
            }
        }
    }
}

/// Per-key creation lock, registered in the cache's gate map while held.
///
/// Dropping it retires the map entry once no other caller is waiting,
/// including when the factory panics.
struct CreationGate<'a> {
    gates: &'a Mutex<HashMap<String, Arc<Mutex<()>>>>,
    key: &'a str,
    gate: Arc<Mutex<()>>,
}

impl<'a> CreationGate<'a> {
    fn enter(gates: &'a Mutex<HashMap<String, Arc<Mutex<()>>>>, key: &'a str) -> Self {
        let gate = gates.lock().entry(key.to_string()).or_default().clone();
        Self { gates, key, gate }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }
}

impl Drop for CreationGate<'_> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock();
        let gate = std::mem::take(&mut self.gate);
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(self.key);
        }
        drop(gate);
    }
}

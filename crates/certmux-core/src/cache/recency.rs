//! Bounded recency store
//!
//! A fixed-capacity key/value map that keeps its entries in recency
//! order and evicts the least recently used entry when full. A store
//! may own its values, in which case every value that leaves the store
//! (eviction, replacement, removal, clear, teardown) is released exactly
//! once through the [`Release`] capability.

use std::borrow::Borrow;
use std::fmt::Display;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, warn};

use crate::error::{BoxError, CacheError, ReleaseError};

/// Explicit release operation for values owned by a store
pub trait Release {
    /// Release the resources held by this value
    fn release(&self) -> Result<(), BoxError>;
}

type Releaser<V> = fn(&V) -> Result<(), BoxError>;

/// Bounded map with least-recently-used eviction
pub struct RecencyStore<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    /// Set once at construction for owning stores
    releaser: Option<Releaser<V>>,
}

impl<K: Hash + Eq, V> RecencyStore<K, V> {
    /// Create a store that drops displaced values without releasing them
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            releaser: None,
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of live entries
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Whether displaced values are released
    pub fn is_owning(&self) -> bool {
        self.releaser.is_some()
    }

    /// Look up a value and promote it to most recently used
    pub fn try_get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    /// Look up a value without touching its recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.peek(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains(key)
    }

    /// Iterate from most recently used to least recently used
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

impl<K: Hash + Eq, V: Release> RecencyStore<K, V> {
    /// Create a store that releases every value it displaces
    pub fn owning(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            releaser: Some(<V as Release>::release),
        }
    }
}

impl<K, V> RecencyStore<K, V>
where
    K: Hash + Eq + Clone + Display,
{
    /// Insert a value as most recently used.
    ///
    /// An existing entry for the same key is released and replaced in
    /// place. Otherwise, if the store is full, the least recently used
    /// entry is evicted first and its key is returned.
    pub fn add(&mut self, key: K, value: V) -> Result<Option<K>, CacheError> {
        let mut evicted = None;
        let displaced = if let Some(old) = self.entries.pop(&key) {
            Some((key.clone(), old))
        } else if self.entries.len() >= self.capacity() {
            self.entries.pop_lru().inspect(|(lru_key, _)| {
                debug!("Evicting least recently used entry: {}", lru_key);
                evicted = Some(lru_key.clone());
            })
        } else {
            None
        };

        let released = displaced.map(|(old_key, old)| self.release(&old_key, old));
        self.entries.put(key, value);

        match released {
            Some(Err(failure)) => Err(CacheError::Release {
                removed: 1,
                failures: vec![failure],
            }),
            _ => Ok(evicted),
        }
    }

    /// Remove a single entry, releasing it if owned
    pub fn remove<Q>(&mut self, key: &Q) -> Result<bool, CacheError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.pop_entry(key) {
            Some((key, value)) => {
                self.release(&key, value)
                    .map_err(|failure| CacheError::Release {
                        removed: 1,
                        failures: vec![failure],
                    })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every entry whose value matches the predicate.
    ///
    /// Candidates are collected in recency order before anything is
    /// removed, so each entry is visited exactly once. Every selected
    /// entry is removed even if some releases fail.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Result<usize, CacheError>
    where
        F: FnMut(&V) -> bool,
    {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, value)| predicate(value))
            .map(|(key, _)| key.clone())
            .collect();

        let removed = doomed.len();
        let mut failures = Vec::new();
        for key in doomed {
            if let Some(value) = self.entries.pop(&key)
                && let Err(failure) = self.release(&key, value)
            {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(CacheError::Release { removed, failures })
        }
    }

    /// Remove every entry, releasing all values if owned
    pub fn clear(&mut self) -> Result<usize, CacheError> {
        let mut removed = 0;
        let mut failures = Vec::new();
        while let Some((key, value)) = self.entries.pop_lru() {
            removed += 1;
            if let Err(failure) = self.release(&key, value) {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(CacheError::Release { removed, failures })
        }
    }

    /// Clear the store and consume it
    pub fn dispose(mut self) -> Result<(), CacheError> {
        self.clear().map(|_| ())
    }

    fn release(&self, key: &K, value: V) -> Result<(), ReleaseError> {
        match self.releaser {
            Some(release) => release(&value).map_err(|source| ReleaseError {
                key: key.to_string(),
                source,
            }),
            None => Ok(()),
        }
    }
}

impl<K: Hash + Eq, V> Drop for RecencyStore<K, V> {
    fn drop(&mut self) {
        let Some(release) = self.releaser else {
            return;
        };
        while let Some((_, value)) = self.entries.pop_lru() {
            if let Err(e) = release(&value) {
                warn!("Failed to release cached value during teardown: {}", e);
            }
        }
    }
}

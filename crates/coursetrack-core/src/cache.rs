//! Ephemeral memoization with absolute expiry. Nothing here is persisted.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expiry: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

#[derive(Debug, Clone)]
pub struct ExpiringCache<K, T> {
    entries: HashMap<K, CacheEntry<T>>,
    ttl: Duration,
}

impl<K: Eq + Hash, T> ExpiringCache<K, T> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Expired entries are evicted on lookup.
    pub fn get(&mut self, key: &K, now: DateTime<Utc>) -> Option<&T> {
        if self.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn insert(&mut self, key: K, value: T, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expiry: now + self.ttl,
            },
        );
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

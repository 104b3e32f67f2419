//! In-process cache backend.
//!
//! A DashMap of `key -> (bytes, expiry)`. Expiry is checked lazily at read
//! time; `sweep_expired` exists for callers that want to reclaim memory
//! eagerly (the health probe does not call it). This is the default backend
//! for development and tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{CacheBackend, StoreError};

struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// Thread-safe in-memory key-value store with TTL.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Live entry count (expired-but-unswept entries included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry now; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.clone()));
            }
        }
        // Expired: drop it so exists/scan agree with get.
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                data: value.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let keys = match pattern.strip_suffix('*') {
            Some(prefix) => self
                .entries
                .iter()
                .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired())
                .map(|entry| entry.key().clone())
                .collect(),
            None => {
                if self.exists(pattern).await? {
                    vec![pattern.to_string()]
                } else {
                    Vec::new()
                }
            }
        };
        Ok(keys)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        // The entry guard holds the shard lock, making read-modify-write
        // atomic per key.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            data: b"0".to_vec(),
            expires_at: None,
        });
        if entry.is_expired() {
            entry.data = b"0".to_vec();
            entry.expires_at = None;
        }
        let current: i64 = std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::NotAnInteger {
                key: key.to_string(),
            })?;
        let next = current + amount;
        entry.data = next.to_string().into_bytes();
        Ok(next)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

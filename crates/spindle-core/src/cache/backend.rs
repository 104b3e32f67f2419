//! The key-value backend port.
//!
//! Backends store opaque bytes. Serialization, namespacing, TTL policy, and
//! fail-open behavior all live above this trait; swapping the backing store
//! must never change caller-visible semantics.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the raw store. The [`CacheManager`](crate::cache::manager::CacheManager)
/// absorbs these (fail open); they never reach business logic.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("value at {key} is not an integer")]
    NotAnInteger { key: String },
}

/// Key-value cache backend.
///
/// # Patterns
/// `scan` accepts either an exact key or a prefix glob with a single
/// trailing `*` (`"category:*"`). That is the only wildcard form the
/// in-memory backend supports; keep invalidation patterns to that shape.
///
/// # Atomicity
/// `incr_by` must be atomic per key (server-side on networked stores).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store bytes, with an optional TTL. `None` means no expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns `true` if the key existed (idempotent delete).
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys matching `pattern` (see trait docs for the supported shapes).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically add `amount` to the integer at `key` (missing keys count
    /// from zero) and return the new value.
    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError>;

    /// Liveness probe used by the health loop.
    async fn ping(&self) -> Result<(), StoreError>;
}

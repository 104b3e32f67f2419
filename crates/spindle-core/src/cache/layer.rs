//! Domain cache layer: namespaced keys, per-category TTL, write strategies.
//!
//! Keys are `{category}:{sha256(parts)}`. The hash is over length-delimited
//! parts, so distinct compound inputs never produce the same key and the
//! same inputs always do. Every category carries a [`CachePolicy`]; unknown
//! categories fall back to the manager's default TTL with write-through.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::manager::CacheManager;

/// Future returned by a source-of-truth persist step.
pub type PersistFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Consistency strategy for a data category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Write cache and source of truth synchronously before returning.
    WriteThrough,
    /// Write cache immediately; persist to the source of truth on a
    /// background task.
    WriteBehind,
    /// Bypass the cache on write; the entry appears on the next read.
    WriteAround,
    /// Check cache first; on miss, compute and populate. Writes behave like
    /// write-around (the next read refills).
    ReadThrough,
}

/// TTL and strategy for one data category.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub strategy: CacheStrategy,
}

impl CachePolicy {
    pub fn new(ttl: Duration, strategy: CacheStrategy) -> Self {
        Self { ttl, strategy }
    }
}

/// Category-aware view over a [`CacheManager`].
pub struct CacheLayer {
    manager: Arc<CacheManager>,
    policies: HashMap<String, CachePolicy>,
    default_policy: CachePolicy,
}

impl CacheLayer {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        let default_policy = CachePolicy::new(
            manager.config().default_ttl,
            CacheStrategy::WriteThrough,
        );
        Self {
            manager,
            policies: HashMap::new(),
            default_policy,
        }
    }

    /// Register a policy for `category` (builder style).
    pub fn with_policy(mut self, category: impl Into<String>, policy: CachePolicy) -> Self {
        self.policies.insert(category.into(), policy);
        self
    }

    pub fn policy(&self, category: &str) -> CachePolicy {
        self.policies
            .get(category)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Deterministic namespaced key for a compound identifier.
    pub fn cache_key(category: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            // Length prefix so ["ab","c"] and ["a","bc"] cannot collide.
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest
            .iter()
            .take(16)
            .map(|byte| format!("{byte:02x}"))
            .collect();
        format!("{category}:{hex}")
    }

    /// Cached read; `None` on miss or cache trouble.
    pub async fn get<T: DeserializeOwned>(&self, category: &str, parts: &[&str]) -> Option<T> {
        let key = Self::cache_key(category, parts);
        self.manager.get(&key).await
    }

    /// Read-through: return the cached value, or compute, populate, and
    /// return. Compute errors pass through; cache trouble does not.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        category: &str,
        parts: &[&str],
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = Self::cache_key(category, parts);
        if let Some(cached) = self.manager.get(&key).await {
            return Ok(cached);
        }
        let value = compute().await?;
        let ttl = self.policy(category).ttl;
        self.manager.set(&key, &value, Some(ttl)).await;
        Ok(value)
    }

    /// Write `value` for the category's strategy. `persist` is the source-of-
    /// truth write; whether it runs inline, in the background, or alone
    /// depends on the policy. Returns `false` when the synchronous part of
    /// the write failed.
    pub async fn write<T, F>(
        &self,
        category: &str,
        parts: &[&str],
        value: &T,
        persist: F,
    ) -> bool
    where
        T: Serialize,
        F: FnOnce() -> PersistFuture + Send + 'static,
    {
        let key = Self::cache_key(category, parts);
        let policy = self.policy(category);
        match policy.strategy {
            CacheStrategy::WriteThrough => {
                if let Err(e) = persist().await {
                    tracing::warn!(category, error = %e, "write-through persist failed");
                    return false;
                }
                self.manager.set(&key, value, Some(policy.ttl)).await
            }
            CacheStrategy::WriteBehind => {
                let cached = self.manager.set(&key, value, Some(policy.ttl)).await;
                let category = category.to_string();
                tokio::spawn(async move {
                    if let Err(e) = persist().await {
                        // No retry here; durability escalation is the
                        // caller's concern.
                        tracing::warn!(category, error = %e, "write-behind persist failed");
                    }
                });
                cached
            }
            CacheStrategy::WriteAround | CacheStrategy::ReadThrough => {
                let persisted = persist().await;
                // Drop any stale copy so the next read refills from source.
                self.manager.delete(&key).await;
                match persisted {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(category, error = %e, "persist failed");
                        false
                    }
                }
            }
        }
    }

    /// Remove one entry; `true` if it was cached.
    pub async fn invalidate(&self, category: &str, parts: &[&str]) -> bool {
        let key = Self::cache_key(category, parts);
        self.manager.delete(&key).await
    }

    /// Remove every entry of a category; returns how many were dropped.
    pub async fn invalidate_category(&self, category: &str) -> usize {
        self.manager.invalidate(&format!("{category}:*")).await
    }
}

//! Pooled, fail-open access to a cache backend.
//!
//! Every operation borrows a pool permit (hard cap on concurrent backend
//! calls) and degrades on trouble instead of erroring: reads become misses,
//! writes become logged no-ops. Correctness above this layer must never
//! depend on the cache being reachable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::cache::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::metrics::CacheSnapshot;

/// EMA smoothing: `new = 0.9 * old + 0.1 * sample`.
const EMA_KEEP: f64 = 0.9;

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    operations: AtomicU64,
    errors: AtomicU64,
}

/// Connection manager over a [`CacheBackend`].
///
/// Values are encoded as canonical JSON; there is exactly one encoding per
/// key-space, never a binary fallback.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    permits: Arc<Semaphore>,
    config: CacheConfig,
    counters: CacheCounters,
    /// Micros; 0 means "not seeded yet". Written only by the health probe.
    latency_ema_micros: AtomicU64,
    connected: AtomicBool,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
            counters: CacheCounters::default(),
            latency_ema_micros: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Borrow a pool permit, waiting at most `acquire_timeout`. `None` means
    /// the pool stayed exhausted; callers fail open.
    async fn permit(&self) -> Option<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        match tokio::time::timeout(self.config.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => Some(permit),
            _ => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("cache connection pool exhausted; failing open");
                None
            }
        }
    }

    /// Typed read. Any failure (pool, backend, decode) counts as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let fetched = match self.permit().await {
            Some(_permit) => self.backend.get(key).await,
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match fetched {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "cached value failed to decode; treating as miss");
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache get failed; treating as miss");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Typed write. Returns `false` (after a logged warning) on any failure.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "value failed to encode; cache set skipped");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        let Some(_permit) = self.permit().await else {
            return false;
        };
        match self.backend.set(key, &bytes, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache set failed; continuing without cache");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let Some(_permit) = self.permit().await else {
            return false;
        };
        match self.backend.delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache delete failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let Some(_permit) = self.permit().await else {
            return false;
        };
        match self.backend.exists(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache exists failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Keys matching `pattern`. Empty on any failure.
    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let Some(_permit) = self.permit().await else {
            return Vec::new();
        };
        match self.backend.scan(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "cache scan failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                Vec::new()
            }
        }
    }

    /// Atomic server-side increment. `None` when the cache is unavailable or
    /// the stored value is not an integer.
    pub async fn increment(&self, key: &str, amount: i64) -> Option<i64> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let _permit = self.permit().await?;
        match self.backend.incr_by(key, amount).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache increment failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Bulk delete of every key matching `pattern`; returns how many went.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let keys = self.scan(pattern).await;
        let mut removed = 0;
        for key in keys {
            if self.delete(&key).await {
                removed += 1;
            }
        }
        removed
    }

    /// One health probe: ping, fold the round trip into the EMA, maintain
    /// the connected flag.
    pub async fn probe_once(&self) {
        let started = Instant::now();
        match self.backend.ping().await {
            Ok(()) => {
                let sample = started.elapsed().as_micros() as u64;
                let old = self.latency_ema_micros.load(Ordering::Relaxed);
                let next = if old == 0 {
                    sample
                } else {
                    (EMA_KEEP * old as f64 + (1.0 - EMA_KEEP) * sample as f64).round() as u64
                };
                // Only the probe writes this, so load/store is race-free.
                self.latency_ema_micros.store(next.max(1), Ordering::Relaxed);
                if !self.connected.swap(true, Ordering::Relaxed) {
                    tracing::info!(latency_us = sample, "cache backend reachable again");
                }
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                if self.connected.swap(false, Ordering::Relaxed) {
                    tracing::warn!(error = %e, "cache backend unreachable");
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Smoothed probe latency in milliseconds; 0.0 until the first probe.
    pub fn latency_ms(&self) -> f64 {
        self.latency_ema_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheSnapshot {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            operations: self.counters.operations.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            connected: self.is_connected(),
            latency_ms: self.latency_ms(),
        }
    }
}

/// Handle for the background health loop.
/// - `request_shutdown` stops the loop at the next tick
/// - `shutdown_and_join` additionally waits for it to exit
pub struct HealthProbe {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl HealthProbe {
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

/// Spawn the periodic ping loop (probes once immediately, then every
/// `health_check_interval`).
pub fn spawn_health_probe(manager: Arc<CacheManager>) -> HealthProbe {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let interval = manager.config.health_check_interval;
        loop {
            manager.probe_once().await;
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped handle counts as shutdown.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    });
    HealthProbe { shutdown_tx, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::StoreError;
    use crate::cache::memory::MemoryBackend;
    use async_trait::async_trait;

    /// Backend where every call fails, for fail-open checks.
    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        async fn set(
            &self,
            _key: &str,
            _value: &[u8],
            _ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        async fn scan(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        async fn incr_by(&self, _key: &str, _amount: i64) -> Result<i64, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Connection("down".into()))
        }
    }

    fn manager_over(backend: Arc<dyn CacheBackend>) -> CacheManager {
        CacheManager::new(backend, CacheConfig::default())
    }

    #[tokio::test]
    async fn round_trip_counts_a_hit() {
        let manager = manager_over(Arc::new(MemoryBackend::new()));
        assert!(manager.set("k", &serde_json::json!({"a": 1}), None).await);
        let value: Option<serde_json::Value> = manager.get("k").await;
        assert_eq!(value, Some(serde_json::json!({"a": 1})));

        let snap = manager.snapshot();
        assert_eq!((snap.hits, snap.misses), (1, 0));
    }

    #[tokio::test]
    async fn every_get_is_a_hit_or_a_miss() {
        let manager = manager_over(Arc::new(MemoryBackend::new()));
        manager.set("present", &1u32, None).await;

        let _: Option<u32> = manager.get("present").await;
        let _: Option<u32> = manager.get("absent").await;
        let _: Option<u32> = manager.get("also-absent").await;

        let snap = manager.snapshot();
        assert_eq!(snap.hits + snap.misses, 3);
        assert_eq!(snap.hits, 1);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_open() {
        let manager = manager_over(Arc::new(DownBackend));

        let read: Option<u32> = manager.get("k").await;
        assert!(read.is_none());
        assert!(!manager.set("k", &1u32, None).await);
        assert!(!manager.delete("k").await);
        assert!(!manager.exists("k").await);
        assert!(manager.scan("k:*").await.is_empty());
        assert!(manager.increment("k", 1).await.is_none());

        let snap = manager.snapshot();
        assert_eq!(snap.misses, 1);
        assert!(snap.errors >= 6);
    }

    #[tokio::test]
    async fn undecodable_value_is_a_miss() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("k", b"not json", None).await.unwrap();
        let manager = manager_over(backend);

        let read: Option<u32> = manager.get("k").await;
        assert!(read.is_none());
        let snap = manager.snapshot();
        assert_eq!((snap.hits, snap.misses), (0, 1));
    }

    #[tokio::test]
    async fn invalidate_removes_matching_keys_only() {
        let manager = manager_over(Arc::new(MemoryBackend::new()));
        manager.set("scores:a", &1u32, None).await;
        manager.set("scores:b", &2u32, None).await;
        manager.set("health:a", &3u32, None).await;

        assert_eq!(manager.invalidate("scores:*").await, 2);
        let survivor: Option<u32> = manager.get("health:a").await;
        assert_eq!(survivor, Some(3));
        let gone: Option<u32> = manager.get("scores:a").await;
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn probe_tracks_latency_and_connectivity() {
        let manager = manager_over(Arc::new(MemoryBackend::new()));
        assert_eq!(manager.latency_ms(), 0.0);
        manager.probe_once().await;
        assert!(manager.is_connected());
        assert!(manager.latency_ms() > 0.0);

        let down = manager_over(Arc::new(DownBackend));
        down.probe_once().await;
        assert!(!down.is_connected());
    }

    #[tokio::test]
    async fn health_loop_exits_when_the_handle_is_dropped() {
        let manager = Arc::new(manager_over(Arc::new(MemoryBackend::new())));
        let HealthProbe { shutdown_tx, join } = spawn_health_probe(Arc::clone(&manager));

        // No graceful shutdown: the handle just goes away. The loop must
        // stop instead of pinging the backend in a tight loop.
        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("probe loop should exit once the shutdown channel is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn health_probe_loop_shuts_down() {
        let manager = Arc::new(manager_over(Arc::new(MemoryBackend::new())));
        let probe = spawn_health_probe(Arc::clone(&manager));
        tokio::time::sleep(Duration::from_millis(20)).await;
        probe.shutdown_and_join().await;
        assert!(manager.is_connected());
    }
}

//! Configuration for the scheduler and the cache connection manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed number of workers started at scheduler start.
    pub worker_count: usize,

    /// Capacity of each priority lane. A full lane rejects new submissions.
    pub queue_capacity: usize,

    /// Default per-task execution deadline; tasks may override it.
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 100,
            task_timeout: Duration::from_secs(30),
        }
    }
}

/// Cache connection manager knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hard cap on concurrent backend operations (the connection pool size).
    pub max_connections: usize,

    /// How long a caller waits for a pool permit before failing open.
    pub acquire_timeout: Duration,

    /// TTL applied when no category policy says otherwise.
    pub default_ttl: Duration,

    /// Interval between background health probes.
    pub health_check_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(2),
            default_ttl: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = SchedulerConfig::default();
        assert!(s.worker_count > 0);
        assert!(s.queue_capacity > 0);
        assert!(s.task_timeout > Duration::ZERO);

        let c = CacheConfig::default();
        assert!(c.max_connections > 0);
        assert!(c.default_ttl > Duration::ZERO);
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let s: SchedulerConfig = serde_json::from_str(r#"{"worker_count": 8}"#).unwrap();
        assert_eq!(s.worker_count, 8);
        assert_eq!(s.queue_capacity, SchedulerConfig::default().queue_capacity);
    }
}

//! Aggregate observability snapshots.
//!
//! Snapshots read incrementally-maintained counters; nothing here replays
//! history, so collection cost does not grow with uptime.

use serde::Serialize;

use crate::cache::manager::CacheManager;
use crate::scheduler::{Scheduler, WorkerStatsSnapshot};

/// Pending tasks per lane.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

/// Scheduler-side snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub queue_depths: QueueDepths,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub avg_execution_ms: f64,
    pub worker_stats: Vec<WorkerStatsSnapshot>,
}

/// Cache-side snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 before any get.
    pub hit_rate: f64,
    pub operations: u64,
    pub errors: u64,
    pub connected: bool,
    /// EMA of health-probe round trips, milliseconds. 0.0 until seeded.
    pub latency_ms: f64,
}

/// One merged view over scheduler and cache.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub scheduler: SchedulerSnapshot,
    pub cache: Option<CacheSnapshot>,
}

impl MetricsSnapshot {
    pub fn collect(scheduler: &Scheduler, cache: Option<&CacheManager>) -> Self {
        Self {
            scheduler: scheduler.snapshot(),
            cache: cache.map(CacheManager::snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_depth_total() {
        let depths = QueueDepths {
            critical: 1,
            high: 2,
            normal: 3,
            low: 4,
        };
        assert_eq!(depths.total(), 10);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snap = SchedulerSnapshot {
            queue_depths: QueueDepths::default(),
            active_workers: 0,
            idle_workers: 2,
            tasks_submitted: 3,
            tasks_rejected: 0,
            tasks_completed: 3,
            tasks_failed: 0,
            avg_execution_ms: 1.5,
            worker_stats: vec![],
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["tasks_completed"], 3);
        assert_eq!(json["queue_depths"]["critical"], 0);
    }
}

//! Priority task scheduler: lanes, registry, worker pool, and the facade.

mod lanes;
mod registry;
mod worker;

pub use registry::TaskRegistry;
pub use worker::WorkerStatsSnapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::SchedulerSnapshot;
use crate::outcome::TaskOutcome;
use crate::task::{Priority, Task, TaskCallback, TaskId, WorkUnit};

use lanes::LaneSet;
use worker::WorkerPool;

/// Monotonic counters behind the snapshot. Updated incrementally; a snapshot
/// never scans history.
#[derive(Default)]
pub(crate) struct SchedulerCounters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    /// Sum of execution times for completed tasks, for the running average.
    pub total_execution_micros: AtomicU64,
}

impl SchedulerCounters {
    pub fn avg_execution_ms(&self) -> f64 {
        let completed = self.completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        let total = self.total_execution_micros.load(Ordering::Relaxed);
        total as f64 / completed as f64 / 1000.0
    }
}

/// State shared between the facade and the workers.
pub(crate) struct Shared {
    pub config: SchedulerConfig,
    pub lanes: LaneSet,
    pub registry: TaskRegistry,
    pub counters: SchedulerCounters,
}

/// Priority task scheduler.
///
/// Construct with [`Scheduler::start`]; workers run until
/// [`Scheduler::shutdown_and_join`]. Instances are meant to be passed around
/// explicitly (wrap in `Arc` if needed); there is no global.
pub struct Scheduler {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl Scheduler {
    /// Start `config.worker_count` workers draining the lanes.
    pub fn start(config: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared {
            lanes: LaneSet::new(config.queue_capacity),
            registry: TaskRegistry::new(),
            counters: SchedulerCounters::default(),
            config,
        });
        let pool = WorkerPool::spawn(shared.config.worker_count, Arc::clone(&shared));
        Self { shared, pool }
    }

    /// Submit a unit of work. Never blocks.
    ///
    /// Returns `Ok(false)` when the target lane is full (backpressure: retry
    /// later or shed load) and `Err(DuplicateTaskId)` when the id is already
    /// in flight or finished.
    pub async fn submit(
        &self,
        id: TaskId,
        priority: Priority,
        work: WorkUnit,
    ) -> Result<bool, SchedulerError> {
        self.submit_task(Task::new(id, priority, work)).await
    }

    /// Submit with a completion callback.
    pub async fn submit_with_callback(
        &self,
        id: TaskId,
        priority: Priority,
        work: WorkUnit,
        callback: TaskCallback,
    ) -> Result<bool, SchedulerError> {
        self.submit_task(Task::new(id, priority, work).with_callback(callback))
            .await
    }

    /// Full-control submission (callback and per-task timeout via [`Task`]).
    pub async fn submit_task(&self, task: Task) -> Result<bool, SchedulerError> {
        let shared = &self.shared;
        shared.registry.reserve(&task.id)?;
        let id = task.id.clone();
        if shared.lanes.try_push(task).await {
            shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            // Rejected submissions leave no trace; the id may be reused.
            shared.registry.release(&id);
            shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            Ok(false)
        }
    }

    /// Wait for the task's value, up to `timeout`.
    ///
    /// The wait deadline is independent of the task's own execution timeout:
    /// `ResultWaitTimeout` means "not yet known", and the task keeps running.
    pub async fn get_result(
        &self,
        id: &TaskId,
        timeout: Duration,
    ) -> Result<serde_json::Value, SchedulerError> {
        let outcome = self.shared.registry.wait(id, timeout).await?;
        match &*outcome {
            TaskOutcome::Completed(result) => Ok(result.value.clone()),
            TaskOutcome::Failed(failure) => Err(SchedulerError::TaskFailed {
                task_id: failure.task_id.clone(),
                kind: failure.kind,
                message: failure.message.clone(),
            }),
        }
    }

    /// Non-blocking peek at a finished task.
    pub fn outcome(&self, id: &TaskId) -> Option<Arc<TaskOutcome>> {
        self.shared.registry.get(id)
    }

    /// Depth of each lane, Critical first.
    pub fn queue_depths(&self) -> [usize; 4] {
        self.shared.lanes.depths()
    }

    /// Drop finished registry entries; returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        self.shared.registry.clear_finished()
    }

    /// O(1) observability snapshot.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let depths = self.queue_depths();
        let worker_stats = self.pool.stats_snapshot();
        let active = worker_stats.iter().filter(|w| w.busy).count();
        let counters = &self.shared.counters;
        SchedulerSnapshot {
            queue_depths: crate::metrics::QueueDepths {
                critical: depths[0],
                high: depths[1],
                normal: depths[2],
                low: depths[3],
            },
            active_workers: active,
            idle_workers: worker_stats.len() - active,
            tasks_submitted: counters.submitted.load(Ordering::Relaxed),
            tasks_rejected: counters.rejected.load(Ordering::Relaxed),
            tasks_completed: counters.completed.load(Ordering::Relaxed),
            tasks_failed: counters.failed.load(Ordering::Relaxed),
            avg_execution_ms: counters.avg_execution_ms(),
            worker_stats,
        }
    }

    /// Stop taking new work and wait for in-flight tasks to finish.
    pub async fn shutdown_and_join(self) {
        self.pool.shutdown_and_join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn work_returning(value: serde_json::Value) -> WorkUnit {
        Box::new(move || Box::pin(async move { Ok(value) }))
    }

    fn config(workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            worker_count: workers,
            queue_capacity: 16,
            task_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn submit_and_get_result_round_trip() {
        let scheduler = Scheduler::start(config(2));
        let id = TaskId::new("round-trip");
        let accepted = scheduler
            .submit(id.clone(), Priority::Normal, work_returning(serde_json::json!(42)))
            .await
            .unwrap();
        assert!(accepted);

        let value = scheduler.get_result(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(value, serde_json::json!(42));
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_synchronously() {
        let scheduler = Scheduler::start(config(1));
        let id = TaskId::new("dup");
        scheduler
            .submit(id.clone(), Priority::Normal, work_returning(serde_json::Value::Null))
            .await
            .unwrap();
        let err = scheduler
            .submit(id.clone(), Priority::Normal, work_returning(serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTaskId(_)));
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn execution_error_surfaces_as_task_failed() {
        let scheduler = Scheduler::start(config(1));
        let id = TaskId::new("boom");
        scheduler
            .submit(
                id.clone(),
                Priority::High,
                Box::new(|| Box::pin(async { Err("kaput".to_string()) })),
            )
            .await
            .unwrap();

        let err = scheduler.get_result(&id, Duration::from_secs(2)).await.unwrap_err();
        match err {
            SchedulerError::TaskFailed { kind, message, .. } => {
                assert_eq!(kind, crate::outcome::FailureKind::Execution);
                assert!(message.contains("kaput"));
            }
            other => panic!("unexpected error: {other}"),
        }
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn slow_task_times_out() {
        let mut cfg = config(1);
        cfg.task_timeout = Duration::from_millis(50);
        let scheduler = Scheduler::start(cfg);
        let id = TaskId::new("sleepy");
        scheduler
            .submit(
                id.clone(),
                Priority::Normal,
                Box::new(|| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Ok(serde_json::Value::Null)
                    })
                }),
            )
            .await
            .unwrap();

        let err = scheduler.get_result(&id, Duration::from_secs(2)).await.unwrap_err();
        match err {
            SchedulerError::TaskFailed { kind, .. } => {
                assert_eq!(kind, crate::outcome::FailureKind::Timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn callback_fires_with_the_value() {
        let scheduler = Scheduler::start(config(1));
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = TaskId::new("cb");
        scheduler
            .submit_with_callback(
                id.clone(),
                Priority::Normal,
                work_returning(serde_json::json!("payload")),
                Arc::new(move |task_id, value, failure| {
                    assert!(failure.is_none());
                    sink.lock()
                        .unwrap()
                        .push(format!("{task_id}={}", value.unwrap()));
                }),
            )
            .await
            .unwrap();

        scheduler.get_result(&id, Duration::from_secs(2)).await.unwrap();
        // The callback runs before the outcome is recorded.
        assert_eq!(seen.lock().unwrap().as_slice(), ["cb=\"payload\""]);
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn per_task_timeout_overrides_the_default() {
        let mut cfg = config(1);
        cfg.task_timeout = Duration::from_millis(300);
        let scheduler = Scheduler::start(cfg);

        // Tighter than the default: the override times it out even though
        // the default deadline would have let it finish.
        let tight = TaskId::new("tight");
        let task = Task::new(
            tight.clone(),
            Priority::Normal,
            Box::new(|| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok(serde_json::Value::Null)
                })
            }),
        )
        .with_timeout(Duration::from_millis(40));
        scheduler.submit_task(task).await.unwrap();
        let err = scheduler.get_result(&tight, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::TaskFailed {
                kind: crate::outcome::FailureKind::Timeout,
                ..
            }
        ));

        // Looser than the default: survives past `task_timeout`.
        let loose = TaskId::new("loose");
        let task = Task::new(
            loose.clone(),
            Priority::Normal,
            Box::new(|| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(serde_json::json!("made it"))
                })
            }),
        )
        .with_timeout(Duration::from_secs(5));
        scheduler.submit_task(task).await.unwrap();
        let value = scheduler.get_result(&loose, Duration::from_secs(5)).await.unwrap();
        assert_eq!(value, serde_json::json!("made it"));
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn backpressure_leaves_no_registry_trace() {
        // No workers: nothing drains the lanes.
        let mut cfg = config(0);
        cfg.queue_capacity = 2;
        let scheduler = Scheduler::start(cfg);

        for i in 0..2 {
            let accepted = scheduler
                .submit(
                    TaskId::new(format!("t-{i}")),
                    Priority::Low,
                    work_returning(serde_json::Value::Null),
                )
                .await
                .unwrap();
            assert!(accepted);
        }
        let rejected_id = TaskId::new("t-2");
        let accepted = scheduler
            .submit(rejected_id.clone(), Priority::Low, work_returning(serde_json::Value::Null))
            .await
            .unwrap();
        assert!(!accepted);

        // The rejected id can be resubmitted once there is room elsewhere.
        let accepted = scheduler
            .submit(rejected_id, Priority::Normal, work_returning(serde_json::Value::Null))
            .await
            .unwrap();
        assert!(accepted);

        let snap = scheduler.snapshot();
        assert_eq!(snap.tasks_submitted, 3);
        assert_eq!(snap.tasks_rejected, 1);
        scheduler.shutdown_and_join().await;
    }
}

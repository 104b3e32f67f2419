//! Worker pool: fixed set of tokio tasks draining the lanes.
//!
//! Each worker loops: pop the highest-priority task, run it under its
//! deadline, record the outcome, repeat. Shutdown is cooperative via a watch
//! channel; in-flight tasks run to completion (or their timeout) first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::outcome::{FailureKind, TaskFailure, TaskOutcome, TaskResult};
use crate::task::Task;

use super::Shared;

/// Fallback poll interval so an idle worker that misses a notify wakes up
/// anyway instead of busy-spinning.
pub(crate) const IDLE_POLL: Duration = Duration::from_millis(100);

/// Per-worker counters. Only the owning worker writes them, so Relaxed
/// atomics are enough; snapshots read from any thread.
pub(crate) struct WorkerStats {
    tasks_processed: AtomicU64,
    errors: AtomicU64,
    total_execution_micros: AtomicU64,
    last_task_micros: AtomicU64,
    busy: AtomicBool,
}

impl WorkerStats {
    fn new() -> Self {
        Self {
            tasks_processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_execution_micros: AtomicU64::new(0),
            last_task_micros: AtomicU64::new(0),
            busy: AtomicBool::new(false),
        }
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatsSnapshot {
    pub worker_id: usize,
    pub tasks_processed: u64,
    pub errors: u64,
    pub total_execution_ms: f64,
    pub last_task_ms: f64,
    pub busy: bool,
}

/// Worker group handle.
/// - `request_shutdown` stops workers from taking new leases
/// - `shutdown_and_join` additionally waits for them to exit
pub(crate) struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Vec<WorkerStats>>,
}

impl WorkerPool {
    pub fn spawn(count: usize, shared: Arc<Shared>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats: Arc<Vec<WorkerStats>> =
            Arc::new((0..count).map(|_| WorkerStats::new()).collect());

        let mut joins = Vec::with_capacity(count);
        for worker_id in 0..count {
            let shared = Arc::clone(&shared);
            let stats = Arc::clone(&stats);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, shared, stats, &mut rx).await;
            });
            joins.push(join);
        }

        Self {
            shutdown_tx,
            joins,
            stats,
        }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }

    pub fn stats_snapshot(&self) -> Vec<WorkerStatsSnapshot> {
        self.stats
            .iter()
            .enumerate()
            .map(|(worker_id, s)| WorkerStatsSnapshot {
                worker_id,
                tasks_processed: s.tasks_processed.load(Ordering::Relaxed),
                errors: s.errors.load(Ordering::Relaxed),
                total_execution_ms: s.total_execution_micros.load(Ordering::Relaxed) as f64
                    / 1000.0,
                last_task_ms: s.last_task_micros.load(Ordering::Relaxed) as f64 / 1000.0,
                busy: s.busy.load(Ordering::Relaxed),
            })
            .collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    stats: Arc<Vec<WorkerStats>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let Some(task) = shared.lanes.pop_highest().await else {
            // All lanes empty: wait for a submit, the fallback tick, or
            // shutdown. The lock is not held here.
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shared.lanes.wait_for_work() => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
            continue;
        };

        run_one(worker_id, task, &shared, &stats[worker_id]).await;
    }
}

/// Execute one task under its deadline and publish the outcome.
///
/// A task failure is terminal for that submission and never terminal for the
/// worker: log, count, move on.
async fn run_one(worker_id: usize, task: Task, shared: &Shared, stats: &WorkerStats) {
    stats.busy.store(true, Ordering::Relaxed);

    let id = task.id;
    let deadline = task.timeout.unwrap_or(shared.config.task_timeout);
    let started = Instant::now();

    let outcome = match timeout(deadline, (task.work)()).await {
        Ok(Ok(value)) => TaskOutcome::Completed(TaskResult {
            task_id: id.clone(),
            value,
            execution_time: started.elapsed(),
            worker_id,
            completed_at: Utc::now(),
        }),
        Ok(Err(message)) => TaskOutcome::Failed(TaskFailure {
            task_id: id.clone(),
            kind: FailureKind::Execution,
            message,
            failed_at: Utc::now(),
        }),
        Err(_elapsed) => TaskOutcome::Failed(TaskFailure {
            task_id: id.clone(),
            kind: FailureKind::Timeout,
            message: format!("execution exceeded {deadline:?}"),
            failed_at: Utc::now(),
        }),
    };

    let elapsed_micros = started.elapsed().as_micros() as u64;
    stats.last_task_micros.store(elapsed_micros, Ordering::Relaxed);
    stats
        .total_execution_micros
        .fetch_add(elapsed_micros, Ordering::Relaxed);
    stats.tasks_processed.fetch_add(1, Ordering::Relaxed);

    match &outcome {
        TaskOutcome::Completed(result) => {
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            shared
                .counters
                .total_execution_micros
                .fetch_add(elapsed_micros, Ordering::Relaxed);
            tracing::debug!(
                task_id = %id,
                worker_id,
                elapsed_ms = elapsed_micros / 1000,
                "task completed"
            );
            if let Some(callback) = &task.callback {
                callback(&id, Some(&result.value), None);
            }
        }
        TaskOutcome::Failed(failure) => {
            stats.errors.fetch_add(1, Ordering::Relaxed);
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                task_id = %id,
                worker_id,
                kind = %failure.kind,
                message = %failure.message,
                "task failed"
            );
            if let Some(callback) = &task.callback {
                callback(&id, None, Some(failure));
            }
        }
    }

    // Publish last: waiters woken here must observe callback side effects.
    shared.registry.complete(Arc::new(outcome));
    stats.busy.store(false, Ordering::Relaxed);
}

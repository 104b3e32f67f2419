//! Task outcomes: write-once result and failure cells.
//!
//! A worker records exactly one outcome per task; the registry never mutates
//! an entry after insertion. Callers may read an outcome any number of times.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Successful completion record, written once by the executing worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub value: serde_json::Value,
    pub execution_time: Duration,
    pub worker_id: usize,
    pub completed_at: DateTime<Utc>,
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Execution exceeded its deadline.
    Timeout,
    /// The work unit itself returned an error.
    Execution,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Execution => "execution",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure record, written once by the executing worker. Terminal for the
/// submission; the scheduler never retries on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub kind: FailureKind,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// What the registry holds for a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(TaskResult),
    Failed(TaskFailure),
}

impl TaskOutcome {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskOutcome::Completed(r) => &r.task_id,
            TaskOutcome::Failed(f) => &f.task_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }
}

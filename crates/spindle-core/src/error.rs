use thiserror::Error;

use crate::outcome::FailureKind;
use crate::task::TaskId;

/// Scheduler-facing errors.
///
/// A full lane is not an error: `submit` returns `Ok(false)` as the
/// backpressure signal. Cache failures never surface here either; the cache
/// fails open.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("no task registered with id {0}")]
    UnknownTask(TaskId),

    /// The caller's wait elapsed; the task may still be running.
    #[error("timed out waiting for result of task {0}")]
    ResultWaitTimeout(TaskId),

    #[error("task {task_id} failed ({kind}): {message}")]
    TaskFailed {
        task_id: TaskId,
        kind: FailureKind,
        message: String,
    },
}

//! Task descriptors: ids, priority lanes, and the submitted unit of work.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::outcome::TaskFailure;

/// Caller-visible task identifier.
///
/// Ids are caller-supplied strings; `generate()` mints a ULID for callers
/// that do not care about the spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Mint a fresh ULID-based id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Priority lane a task is placed into at submission.
///
/// Workers drain lanes in strict declaration order: Critical first, Low last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// All lanes, highest priority first. Workers poll in this order.
    pub const LANES: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Index of this lane in [`Priority::LANES`].
    pub fn lane_index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed future produced by a work unit.
pub type WorkFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>;

/// The unit of work a caller submits. Invoked once by the executing worker;
/// the string error becomes the recorded failure message.
pub type WorkUnit = Box<dyn FnOnce() -> WorkFuture + Send>;

/// Completion callback: `(task_id, value, failure)`.
///
/// Exactly one of `value` / `failure` is `Some`. One well-typed shape for
/// every caller; no dynamic signatures.
pub type TaskCallback = Arc<dyn Fn(&TaskId, Option<&serde_json::Value>, Option<&TaskFailure>) + Send + Sync>;

/// A submitted task. Owned by its lane until a worker dequeues it, then by
/// that worker until completion.
pub struct Task {
    pub id: TaskId,
    pub priority: Priority,
    pub work: WorkUnit,
    pub callback: Option<TaskCallback>,
    /// Per-task execution deadline; the scheduler default applies when None.
    pub timeout: Option<Duration>,
    pub submitted_at: Instant,
}

impl Task {
    pub fn new(id: TaskId, priority: Priority, work: WorkUnit) -> Self {
        Self {
            id,
            priority,
            work,
            callback: None,
            timeout: None,
            submitted_at: Instant::now(),
        }
    }

    pub fn with_callback(mut self, callback: TaskCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

//! Task registry: in-flight reservation plus write-once outcome cells.
//!
//! Design:
//! - The registry is the single arbiter of id uniqueness. `reserve` claims an
//!   id at submit time; a submission bounced by a full lane calls `release`
//!   so the id can be reused.
//! - Each entry is written exactly once (by the worker that executed the
//!   task), so readers only need the atomic map lookup.
//! - `wait` is notification-based, not sleep-polling: the `Notify` future is
//!   armed before the map check, so a completion between check and await
//!   still wakes the waiter.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::SchedulerError;
use crate::outcome::TaskOutcome;
use crate::task::TaskId;

#[derive(Clone)]
enum Slot {
    /// Submitted, not yet finished (queued or executing).
    Pending,
    Done(Arc<TaskOutcome>),
}

pub struct TaskRegistry {
    slots: DashMap<TaskId, Slot>,
    done: Notify,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            done: Notify::new(),
        }
    }

    /// Claim an id for a new submission.
    pub fn reserve(&self, id: &TaskId) -> Result<(), SchedulerError> {
        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => Err(SchedulerError::DuplicateTaskId(id.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Pending);
                Ok(())
            }
        }
    }

    /// Drop a reservation that never made it into a lane.
    pub fn release(&self, id: &TaskId) {
        self.slots.remove_if(id, |_, slot| matches!(slot, Slot::Pending));
    }

    /// Record the outcome and wake every waiter. Called once per task.
    pub fn complete(&self, outcome: Arc<TaskOutcome>) {
        self.slots
            .insert(outcome.task_id().clone(), Slot::Done(outcome));
        self.done.notify_waiters();
    }

    /// Non-blocking peek at a finished task.
    pub fn get(&self, id: &TaskId) -> Option<Arc<TaskOutcome>> {
        match self.slots.get(id).map(|slot| slot.value().clone()) {
            Some(Slot::Done(outcome)) => Some(outcome),
            _ => None,
        }
    }

    /// Is the id reserved or finished?
    pub fn contains(&self, id: &TaskId) -> bool {
        self.slots.contains_key(id)
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// A timeout here says nothing about the task itself; it keeps running.
    pub async fn wait(
        &self,
        id: &TaskId,
        timeout: Duration,
    ) -> Result<Arc<TaskOutcome>, SchedulerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the notification before checking the map.
            let notified = self.done.notified();
            match self.slots.get(id).map(|slot| slot.value().clone()) {
                None => return Err(SchedulerError::UnknownTask(id.clone())),
                Some(Slot::Done(outcome)) => return Ok(outcome),
                Some(Slot::Pending) => {}
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(SchedulerError::ResultWaitTimeout(id.clone()));
            }
        }
    }

    /// Remove all finished entries. Pending entries stay. Returns how many
    /// were removed.
    pub fn clear_finished(&self) -> usize {
        let mut removed = 0;
        self.slots.retain(|_, slot| {
            if matches!(slot, Slot::Done(_)) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Bounded priority lanes.
//!
//! Four FIFO queues behind a single mutex. Queue push/pop are the only
//! operations that hold the lock; task execution never does.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};

use crate::task::{Priority, Task};

/// The four bounded lanes plus the wakeup used by idle workers.
pub(crate) struct LaneSet {
    queues: Mutex<[VecDeque<Task>; 4]>,
    capacity: usize,
    /// Mirrors queue lengths so depth snapshots never take the lock.
    depths: [AtomicUsize; 4],
    notify: Notify,
}

impl LaneSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
            capacity,
            depths: std::array::from_fn(|_| AtomicUsize::new(0)),
            notify: Notify::new(),
        }
    }

    /// Non-blocking push. Returns `false` when the target lane is full; the
    /// caller treats that as backpressure, not an error.
    pub async fn try_push(&self, task: Task) -> bool {
        let lane = task.priority.lane_index();
        {
            let mut queues = self.queues.lock().await;
            if queues[lane].len() >= self.capacity {
                return false;
            }
            queues[lane].push_back(task);
            self.depths[lane].fetch_add(1, Ordering::Relaxed);
        }
        // Notify outside the lock.
        self.notify.notify_one();
        true
    }

    /// Take the front task of the first non-empty lane, Critical to Low.
    ///
    /// Strict priority is deliberate: a sustained stream of high-priority
    /// work postpones Low-lane tasks indefinitely.
    pub async fn pop_highest(&self) -> Option<Task> {
        let mut queues = self.queues.lock().await;
        for priority in Priority::LANES {
            let lane = priority.lane_index();
            if let Some(task) = queues[lane].pop_front() {
                self.depths[lane].fetch_sub(1, Ordering::Relaxed);
                return Some(task);
            }
        }
        None
    }

    /// Current depth per lane, ordered as [`Priority::LANES`].
    pub fn depths(&self) -> [usize; 4] {
        std::array::from_fn(|i| self.depths[i].load(Ordering::Relaxed))
    }

    /// Wait until someone pushes (or a spurious wakeup).
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;
    use rstest::rstest;

    fn task(id: &str, priority: Priority) -> Task {
        Task::new(
            TaskId::new(id),
            priority,
            Box::new(|| Box::pin(async { Ok(serde_json::Value::Null) })),
        )
    }

    #[tokio::test]
    async fn pop_is_fifo_within_a_lane() {
        let lanes = LaneSet::new(8);
        assert!(lanes.try_push(task("a", Priority::Normal)).await);
        assert!(lanes.try_push(task("b", Priority::Normal)).await);

        assert_eq!(lanes.pop_highest().await.unwrap().id.as_str(), "a");
        assert_eq!(lanes.pop_highest().await.unwrap().id.as_str(), "b");
        assert!(lanes.pop_highest().await.is_none());
    }

    #[rstest]
    #[case(Priority::Critical, Priority::High)]
    #[case(Priority::High, Priority::Normal)]
    #[case(Priority::Normal, Priority::Low)]
    #[case(Priority::Critical, Priority::Low)]
    #[tokio::test]
    async fn higher_lane_wins_regardless_of_arrival_order(
        #[case] higher: Priority,
        #[case] lower: Priority,
    ) {
        let lanes = LaneSet::new(8);
        assert!(lanes.try_push(task("late-low", lower)).await);
        assert!(lanes.try_push(task("early-high", higher)).await);

        assert_eq!(lanes.pop_highest().await.unwrap().priority, higher);
        assert_eq!(lanes.pop_highest().await.unwrap().priority, lower);
    }

    #[tokio::test]
    async fn full_lane_rejects_without_touching_other_lanes() {
        let lanes = LaneSet::new(2);
        assert!(lanes.try_push(task("1", Priority::Low)).await);
        assert!(lanes.try_push(task("2", Priority::Low)).await);
        assert!(!lanes.try_push(task("3", Priority::Low)).await);
        // Other lanes still have room.
        assert!(lanes.try_push(task("4", Priority::High)).await);

        assert_eq!(lanes.depths(), [0, 1, 0, 2]);
    }
}

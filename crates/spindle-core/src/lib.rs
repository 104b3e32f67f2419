//! spindle-core
//!
//! Priority-based async task scheduling and a fail-open caching layer.
//!
//! # Module map
//! - **task**: task descriptors (`TaskId`, `Priority`, `Task`, work/callback types)
//! - **outcome**: write-once result cells (`TaskResult`, `TaskFailure`, `TaskOutcome`)
//! - **error**: `SchedulerError`
//! - **config**: `SchedulerConfig`, `CacheConfig`
//! - **scheduler**: `Scheduler` facade, priority lanes, task registry, worker pool
//! - **cache**: `CacheBackend` port, in-memory (and optional Redis) backends,
//!   pooled `CacheManager`, per-category `CacheLayer`
//! - **metrics**: merged O(1) snapshots for observability

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod outcome;
pub mod scheduler;
pub mod task;

pub use cache::layer::{CacheLayer, CachePolicy, CacheStrategy, PersistFuture};
pub use cache::manager::CacheManager;
pub use cache::memory::MemoryBackend;
pub use config::{CacheConfig, SchedulerConfig};
pub use error::SchedulerError;
pub use metrics::MetricsSnapshot;
pub use outcome::{FailureKind, TaskFailure, TaskOutcome, TaskResult};
pub use scheduler::Scheduler;
pub use task::{Priority, Task, TaskId};

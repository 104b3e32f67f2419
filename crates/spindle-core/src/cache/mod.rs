//! Caching layer: backend port, connection manager, and category policies.
//!
//! Layering, bottom up:
//! - [`backend`]: the `CacheBackend` port. Backends are dumb key-value
//!   stores; no policy lives down there.
//! - [`memory`] / [`redis`]: port implementations (in-process for dev and
//!   tests, networked Redis behind the `redis` feature).
//! - [`manager`]: pooled, fail-open access with counters and a health probe.
//! - [`layer`]: key namespacing, per-category TTL, and write strategies.

pub mod backend;
pub mod layer;
pub mod manager;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use backend::{CacheBackend, StoreError};

//! The scheduling engine.
//!
//! - [`config`]: dispatcher configuration
//! - [`builder`]: fluent dispatcher construction
//! - [`stats`]: per-queue counters and snapshots
//! - `queue`: the two-section per-worker task queue
//! - `worker`: coroutine and I/O worker run-loops
//! - `core`: pools, queue selection, drain/terminate lifecycle

pub mod builder;
pub mod config;
pub(crate) mod core;
pub(crate) mod queue;
pub mod stats;
pub(crate) mod worker;

pub use builder::DispatcherBuilder;
pub use config::{DispatcherConfig, DEFAULT_IO_THREADS, DEFAULT_SLAB_CAPACITY};
pub use stats::QueueStatistics;

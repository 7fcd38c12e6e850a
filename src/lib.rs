//! Twinpool: a parallel task dispatcher with two dedicated thread pools.
//!
//! # Overview
//!
//! Twinpool runs two classes of work concurrently and keeps them from
//! interfering with each other:
//!
//! - **Cooperative coroutines**: short, non-blocking units that yield
//!   voluntarily. Each coroutine worker drives its own queue
//!   single-threadedly; a coroutine always resumes on the worker it
//!   yielded on.
//! - **Blocking I/O tasks**: long-running or syscall-heavy units that run
//!   straight through on a separate pool so they never occupy a
//!   coroutine worker.
//!
//! Every worker owns one queue with a high-priority section that drains
//! strictly before the normal section. Posting with [`QueueId::Any`]
//! picks the least-loaded queue; high-priority work runs as soon as the
//! current task yields or finishes, never preemptively.
//!
//! Results travel through single-assignment futures. `post_first`
//! returns a chainable [`Context`]: successors attached with `then`,
//! `on_error`, and `finally` run strictly after their predecessor, with
//! errors routed to the next error-handling link.
//!
//! # Example
//!
//! ```
//! use twinpool::TaskDispatcher;
//!
//! let dispatcher = TaskDispatcher::builder().coro_threads(2).build();
//! let mut ctx = dispatcher
//!     .post(|handle| async move {
//!         handle.yield_now().await;
//!         handle.set("done");
//!         0
//!     })
//!     .unwrap();
//! assert_eq!(ctx.get().unwrap(), "done");
//! dispatcher.drain().unwrap();
//! ```
//!
//! # Module Structure
//!
//! - [`dispatcher`]: the [`TaskDispatcher`] facade and its handle
//! - [`context`]: caller handles and the chaining surface
//! - [`task`]: coroutine and I/O task machinery
//! - [`future`]: single-assignment futures and promises
//! - [`runtime`]: queues, workers, configuration, statistics
//! - [`pool`]: the fixed-capacity control-block slab
//! - [`types`]: ids and queue selectors
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod future;
pub mod pool;
pub mod runtime;
pub mod task;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use context::Context;
pub use dispatcher::{DispatcherHandle, TaskDispatcher};
pub use error::{Error, ErrorKind, Result};
pub use future::{TaskFuture, TaskPromise};
pub use pool::{Pooled, SlabPool};
pub use runtime::{DispatcherBuilder, DispatcherConfig, QueueStatistics};
pub use task::coro::CoroHandle;
pub use task::io::IoPromise;
pub use types::{PoolKind, QueueId, TaskId};

//! Fluent construction of a [`TaskDispatcher`].
//!
//! ```
//! use twinpool::TaskDispatcher;
//!
//! let dispatcher = TaskDispatcher::builder()
//!     .coro_threads(4)
//!     .io_threads(2)
//!     .build();
//! assert_eq!(dispatcher.coro_threads(), 4);
//! ```

use crate::dispatcher::TaskDispatcher;
use crate::runtime::config::DispatcherConfig;

/// Builder for [`TaskDispatcher`].
#[derive(Debug, Clone, Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Starts from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of coroutine workers. `0` means one per logical core.
    #[must_use]
    pub fn coro_threads(mut self, count: usize) -> Self {
        self.config.coro_threads = count;
        self
    }

    /// Number of blocking I/O workers.
    #[must_use]
    pub fn io_threads(mut self, count: usize) -> Self {
        self.config.io_threads = count;
        self
    }

    /// Pin coroutine worker *i* to core *i*, when the pool fits the
    /// machine.
    #[must_use]
    pub fn pin_coro_threads_to_cores(mut self, pin: bool) -> Self {
        self.config.pin_coro_threads_to_cores = pin;
        self
    }

    /// Name prefix for worker threads.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Stack size per worker thread.
    #[must_use]
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.config.thread_stack_size = bytes;
        self
    }

    /// Per-queue control-block slab capacity.
    #[must_use]
    pub fn slab_capacity(mut self, capacity: usize) -> Self {
        self.config.slab_capacity = capacity;
        self
    }

    /// Bound on per-queue heap-fallback control blocks.
    #[must_use]
    pub fn slab_heap_limit(mut self, limit: Option<usize>) -> Self {
        self.config.slab_heap_limit = limit;
        self
    }

    /// Builds the dispatcher, spawning both worker pools.
    #[must_use]
    pub fn build(self) -> TaskDispatcher {
        TaskDispatcher::with_config(self.config)
    }
}

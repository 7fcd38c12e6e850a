//! The public dispatcher facade.
//!
//! [`TaskDispatcher`] owns both worker pools and is the entry point for
//! posting work. [`DispatcherHandle`] is its cloneable, post-capable
//! companion: tasks that need to post follow-up work capture a handle,
//! which keeps no ownership of the pools and cannot drain or terminate
//! them.

use crate::context::{new_chain, Context};
use crate::error::Result;
use crate::future::TaskFuture;
use crate::runtime::builder::DispatcherBuilder;
use crate::runtime::config::DispatcherConfig;
use crate::runtime::core::{DispatcherCore, Shared};
use crate::runtime::stats::QueueStatistics;
use crate::task::chain::{Placement, Starter};
use crate::task::coro::CoroHandle;
use crate::task::io::{wrap_io_task, IoPromise};
use crate::types::{PoolKind, QueueId};
use std::future::Future;
use std::sync::Arc;

/// Parallel execution engine running coroutines and blocking I/O tasks
/// on two dedicated thread pools.
///
/// Dropping the dispatcher drains outstanding work (best effort) and
/// then terminates both pools.
///
/// # Example
///
/// ```
/// use twinpool::TaskDispatcher;
///
/// let dispatcher = TaskDispatcher::builder().coro_threads(2).build();
/// let mut ctx = dispatcher
///     .post(|handle| async move {
///         handle.set(41 + 1);
///         0
///     })
///     .unwrap();
/// assert_eq!(ctx.get().unwrap(), 42);
/// ```
#[derive(Debug)]
pub struct TaskDispatcher {
    core: DispatcherCore,
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDispatcher {
    /// Creates a dispatcher with the default configuration: one
    /// coroutine worker per logical core, five I/O workers, no pinning.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Creates a dispatcher with explicit pool sizes.
    ///
    /// `coro_threads == 0` means one per logical core.
    #[must_use]
    pub fn with_threads(coro_threads: usize, io_threads: usize, pin_to_cores: bool) -> Self {
        Self::with_config(DispatcherConfig {
            coro_threads,
            io_threads,
            pin_coro_threads_to_cores: pin_to_cores,
            ..DispatcherConfig::default()
        })
    }

    /// Creates a dispatcher from a full configuration.
    #[must_use]
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            core: DispatcherCore::new(config),
        }
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Returns a cloneable handle for posting from tasks and other
    /// threads.
    #[must_use]
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: Arc::clone(self.core.shared()),
        }
    }

    /// Posts a coroutine on an auto-selected queue at normal priority.
    ///
    /// The returned context is non-chainable.
    pub fn post<R, F, Fut>(&self, f: F) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(self.core.shared(), QueueId::Any, false, false, f)
    }

    /// Posts a coroutine on an explicit queue and priority.
    ///
    /// The returned context is non-chainable.
    pub fn post_on<R, F, Fut>(
        &self,
        queue: QueueId,
        high_priority: bool,
        f: F,
    ) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(self.core.shared(), queue, high_priority, false, f)
    }

    /// Posts the head of a continuation chain.
    ///
    /// The head is scheduled once the chain is sealed ([`Context::end`],
    /// first future access, or drop).
    pub fn post_first<R, F, Fut>(&self, f: F) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(self.core.shared(), QueueId::Any, false, true, f)
    }

    /// Posts a chain head on an explicit queue and priority.
    pub fn post_first_on<R, F, Fut>(
        &self,
        queue: QueueId,
        high_priority: bool,
        f: F,
    ) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(self.core.shared(), queue, high_priority, true, f)
    }

    /// Posts a blocking task to the I/O pool.
    pub fn post_async_io<R, F>(&self, f: F) -> Result<TaskFuture<R>>
    where
        R: Send + 'static,
        F: FnOnce(IoPromise<R>) -> i32 + Send + 'static,
    {
        post_io(self.core.shared(), QueueId::Any, false, f)
    }

    /// Posts a blocking task to an explicit I/O queue and priority.
    pub fn post_async_io_on<R, F>(
        &self,
        queue: QueueId,
        high_priority: bool,
        f: F,
    ) -> Result<TaskFuture<R>>
    where
        R: Send + 'static,
        F: FnOnce(IoPromise<R>) -> i32 + Send + 'static,
    {
        post_io(self.core.shared(), queue, high_priority, f)
    }

    /// Blocks until all queues are empty and all workers idle.
    ///
    /// While draining, external posts are rejected with
    /// [`InvalidState`](crate::ErrorKind::InvalidState); posts from
    /// within executing tasks are still accepted. Must not be called
    /// from within a task.
    pub fn drain(&self) -> Result<()> {
        self.core.drain()
    }

    /// Fast shutdown: stops all workers and abandons pending work,
    /// resolving its futures to
    /// [`Terminated`](crate::ErrorKind::Terminated). Blocking and
    /// idempotent.
    pub fn terminate(&self) {
        self.core.terminate();
    }

    /// Total resident tasks for the selected pool(s) and queue,
    /// including currently executing ones.
    pub fn size(&self, kind: PoolKind, queue: QueueId) -> Result<usize> {
        self.core.shared().query_size(kind, queue)
    }

    /// True if the selected pool(s) and queue hold no tasks.
    pub fn empty(&self, kind: PoolKind, queue: QueueId) -> Result<bool> {
        self.core.shared().query_empty(kind, queue)
    }

    /// Scheduling statistics for the selected pool(s) and queue.
    pub fn stats(&self, kind: PoolKind, queue: QueueId) -> Result<QueueStatistics> {
        self.core.shared().query_stats(kind, queue)
    }

    /// Zeroes every queue's counters.
    pub fn reset_stats(&self) {
        self.core.shared().reset_stats();
    }

    /// Number of coroutine workers.
    #[must_use]
    pub fn coro_threads(&self) -> usize {
        self.core.shared().coro_threads()
    }

    /// Number of I/O workers.
    #[must_use]
    pub fn io_threads(&self) -> usize {
        self.core.shared().io_threads()
    }
}

impl Drop for TaskDispatcher {
    fn drop(&mut self) {
        if !self.core.shared().is_terminated() {
            let _ = self.core.drain();
            self.core.terminate();
        }
    }
}

/// A cloneable, post-capable reference to a dispatcher.
///
/// Handles are what tasks capture to post follow-up work (including to
/// [`QueueId::Same`]). They expose the query surface but not the
/// lifecycle: `drain` and `terminate` stay with the owning
/// [`TaskDispatcher`].
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// See [`TaskDispatcher::post`].
    pub fn post<R, F, Fut>(&self, f: F) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(&self.shared, QueueId::Any, false, false, f)
    }

    /// See [`TaskDispatcher::post_on`].
    pub fn post_on<R, F, Fut>(
        &self,
        queue: QueueId,
        high_priority: bool,
        f: F,
    ) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(&self.shared, queue, high_priority, false, f)
    }

    /// See [`TaskDispatcher::post_first`].
    pub fn post_first<R, F, Fut>(&self, f: F) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(&self.shared, QueueId::Any, false, true, f)
    }

    /// See [`TaskDispatcher::post_first_on`].
    pub fn post_first_on<R, F, Fut>(
        &self,
        queue: QueueId,
        high_priority: bool,
        f: F,
    ) -> Result<Context<R>>
    where
        R: Send + 'static,
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        post_coro(&self.shared, queue, high_priority, true, f)
    }

    /// See [`TaskDispatcher::post_async_io`].
    pub fn post_async_io<R, F>(&self, f: F) -> Result<TaskFuture<R>>
    where
        R: Send + 'static,
        F: FnOnce(IoPromise<R>) -> i32 + Send + 'static,
    {
        post_io(&self.shared, QueueId::Any, false, f)
    }

    /// See [`TaskDispatcher::post_async_io_on`].
    pub fn post_async_io_on<R, F>(
        &self,
        queue: QueueId,
        high_priority: bool,
        f: F,
    ) -> Result<TaskFuture<R>>
    where
        R: Send + 'static,
        F: FnOnce(IoPromise<R>) -> i32 + Send + 'static,
    {
        post_io(&self.shared, queue, high_priority, f)
    }

    /// See [`TaskDispatcher::size`].
    pub fn size(&self, kind: PoolKind, queue: QueueId) -> Result<usize> {
        self.shared.query_size(kind, queue)
    }

    /// See [`TaskDispatcher::empty`].
    pub fn empty(&self, kind: PoolKind, queue: QueueId) -> Result<bool> {
        self.shared.query_empty(kind, queue)
    }

    /// See [`TaskDispatcher::stats`].
    pub fn stats(&self, kind: PoolKind, queue: QueueId) -> Result<QueueStatistics> {
        self.shared.query_stats(kind, queue)
    }

    /// See [`TaskDispatcher::reset_stats`].
    pub fn reset_stats(&self) {
        self.shared.reset_stats();
    }

    /// Number of coroutine workers.
    #[must_use]
    pub fn coro_threads(&self) -> usize {
        self.shared.coro_threads()
    }

    /// Number of I/O workers.
    #[must_use]
    pub fn io_threads(&self) -> usize {
        self.shared.io_threads()
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("shared", &self.shared)
            .finish()
    }
}

fn post_coro<R, F, Fut>(
    shared: &Arc<Shared>,
    queue: QueueId,
    high_priority: bool,
    chainable: bool,
    f: F,
) -> Result<Context<R>>
where
    R: Send + 'static,
    F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
    Fut: Future<Output = i32> + Send + 'static,
{
    shared.check_post()?;
    shared.validate_post_selector(PoolKind::Coro, queue)?;
    // `Same` is resolved against the calling context now, not at seal
    // time when the thread may differ.
    let queue = match queue {
        QueueId::Same => QueueId::Index(shared.select_queue(PoolKind::Coro, QueueId::Same)?),
        other => other,
    };
    let placement = Placement {
        queue,
        high_priority,
    };
    let (chain, future) = new_chain::<R>();
    let starter: Starter<R> = Box::new(move |handle| Box::pin(f(handle)));
    if chainable {
        Ok(Context::new_deferred(
            chain,
            future,
            Arc::clone(shared),
            starter,
            placement,
        ))
    } else {
        let task = chain.seal_head(starter);
        shared.enqueue_coro(task, placement)?;
        Ok(Context::new_immediate(
            chain,
            future,
            Arc::clone(shared),
            placement,
        ))
    }
}

fn post_io<R, F>(
    shared: &Arc<Shared>,
    queue: QueueId,
    high_priority: bool,
    f: F,
) -> Result<TaskFuture<R>>
where
    R: Send + 'static,
    F: FnOnce(IoPromise<R>) -> i32 + Send + 'static,
{
    shared.check_post()?;
    shared.validate_post_selector(PoolKind::Io, queue)?;
    let (work, future) = wrap_io_task(f);
    shared.enqueue_io(
        work,
        Placement {
            queue,
            high_priority,
        },
    )?;
    Ok(future)
}

//! The caller's handle to a posted task or chain.
//!
//! [`Context`] carries the terminal future and, for chainable contexts
//! (from [`post_first`](crate::TaskDispatcher::post_first)), the chain
//! building surface. A chainable context defers scheduling its head
//! task until the chain is *sealed*: by [`Context::end`], by first
//! access to the terminal future, or by drop. Attachments therefore
//! always complete before the head can be picked up by a worker, and
//! any attachment after sealing fails with
//! [`InvalidState`](crate::ErrorKind::InvalidState).
//!
//! Contexts returned by plain [`post`](crate::TaskDispatcher::post) are
//! non-chainable: the task is already scheduled and attachments are
//! rejected.

use crate::error::{Error, ErrorKind, Result};
use crate::future::{FutureSlot, TaskFuture};
use crate::runtime::core::Shared;
use crate::task::chain::{ChainDriver, ChainLink, ChainState, LinkClass, Placement, Starter};
use crate::task::coro::CoroHandle;
use crate::types::{PoolKind, QueueId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

struct PendingHead<R: Send + 'static> {
    starter: Starter<R>,
    placement: Placement,
}

struct ContextInner<R: Send + 'static> {
    chain: Arc<ChainState<R>>,
    future: TaskFuture<R>,
    shared: Arc<Shared>,
    /// Placement inherited by links attached without an explicit one.
    default_placement: Placement,
    /// `Some` while the chain head has not been scheduled yet.
    head: Option<PendingHead<R>>,
    chainable: bool,
}

impl<R: Send + 'static> ContextInner<R> {
    /// Schedules the head if it is still pending. After this the chain
    /// is immutable.
    fn seal(&mut self) {
        if let Some(head) = self.head.take() {
            let task = self.chain.seal_head(head.starter);
            if let Err(error) = self.shared.enqueue_coro(task, head.placement) {
                // The caller may already hold the future; deliver the
                // rejection through it.
                self.chain.fail(error);
            }
        }
    }
}

/// Caller-visible handle to a posted task or continuation chain.
pub struct Context<R: Send + 'static> {
    inner: Option<ContextInner<R>>,
}

impl<R: Send + 'static> Context<R> {
    pub(crate) fn new_immediate(
        chain: Arc<ChainState<R>>,
        future: TaskFuture<R>,
        shared: Arc<Shared>,
        default_placement: Placement,
    ) -> Self {
        Self {
            inner: Some(ContextInner {
                chain,
                future,
                shared,
                default_placement,
                head: None,
                chainable: false,
            }),
        }
    }

    pub(crate) fn new_deferred(
        chain: Arc<ChainState<R>>,
        future: TaskFuture<R>,
        shared: Arc<Shared>,
        starter: Starter<R>,
        placement: Placement,
    ) -> Self {
        Self {
            inner: Some(ContextInner {
                chain,
                future,
                shared,
                default_placement: placement,
                head: Some(PendingHead { starter, placement }),
                chainable: true,
            }),
        }
    }

    fn inner(&self) -> &ContextInner<R> {
        self.inner.as_ref().expect("context inner taken only on drop")
    }

    fn inner_mut(&mut self) -> &mut ContextInner<R> {
        self.inner.as_mut().expect("context inner taken only on drop")
    }

    fn attach<F, Fut>(
        self,
        class: LinkClass,
        queue: Option<(QueueId, bool)>,
        f: F,
    ) -> Result<Self>
    where
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        let inner = self.inner();
        if !inner.chainable || inner.head.is_none() {
            return Err(
                Error::new(ErrorKind::InvalidState).with_context("context is not chainable")
            );
        }
        let placement = match queue {
            Some((queue, high_priority)) => {
                inner.shared.validate_post_selector(PoolKind::Coro, queue)?;
                Placement {
                    queue,
                    high_priority,
                }
            }
            None => inner.default_placement,
        };
        let starter: Starter<R> = Box::new(move |handle| Box::pin(f(handle)));
        inner.chain.push_link(ChainLink {
            class,
            placement,
            starter,
        })?;
        Ok(self)
    }

    /// Appends a success-path link to the chain.
    ///
    /// The link inherits the head's placement.
    pub fn then<F, Fut>(self, f: F) -> Result<Self>
    where
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        self.attach(LinkClass::Then, None, f)
    }

    /// Appends a success-path link with an explicit placement.
    pub fn then_on<F, Fut>(self, queue: QueueId, high_priority: bool, f: F) -> Result<Self>
    where
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        self.attach(LinkClass::Then, Some((queue, high_priority)), f)
    }

    /// Appends an error-handling link.
    ///
    /// It runs only when an earlier link failed; returning `0` absorbs
    /// the error and resumes the success path.
    pub fn on_error<F, Fut>(self, f: F) -> Result<Self>
    where
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        self.attach(LinkClass::OnError, None, f)
    }

    /// Appends an error-handling link with an explicit placement.
    pub fn on_error_on<F, Fut>(self, queue: QueueId, high_priority: bool, f: F) -> Result<Self>
    where
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        self.attach(LinkClass::OnError, Some((queue, high_priority)), f)
    }

    /// Appends a terminating link that runs on both paths.
    ///
    /// Nothing can be attached after it.
    pub fn finally<F, Fut>(self, f: F) -> Result<Self>
    where
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        self.attach(LinkClass::Finally, None, f)
    }

    /// Appends a terminating link with an explicit placement.
    pub fn finally_on<F, Fut>(self, queue: QueueId, high_priority: bool, f: F) -> Result<Self>
    where
        F: FnOnce(CoroHandle<R>) -> Fut + Send + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        self.attach(LinkClass::Finally, Some((queue, high_priority)), f)
    }

    /// Seals the chain and schedules its head.
    ///
    /// Further attachments fail with `InvalidState`. Sealing also
    /// happens implicitly on first future access and on drop.
    #[must_use]
    pub fn end(mut self) -> Self {
        self.inner_mut().seal();
        self
    }

    /// Returns the terminal future, sealing the chain first.
    #[must_use]
    pub fn future(&mut self) -> TaskFuture<R> {
        let inner = self.inner_mut();
        inner.seal();
        inner.future.clone()
    }

    /// Blocks until the terminal future resolves (seals the chain).
    pub fn wait(&mut self) {
        self.future().wait();
    }

    /// Blocks until resolution or timeout (seals the chain).
    ///
    /// Returns true if the chain resolved in time.
    #[must_use]
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        self.future().wait_for(timeout)
    }

    /// Waits for the terminal outcome, sealing the chain first.
    pub fn get(&mut self) -> Result<R>
    where
        R: Clone,
    {
        self.future().get()
    }

    /// Waits for the terminal outcome and moves the value out.
    pub fn take(mut self) -> Result<R> {
        let future = self.future();
        future.take()
    }

    /// True while further links can be attached.
    #[must_use]
    pub fn is_chainable(&self) -> bool {
        let inner = self.inner();
        inner.chainable && inner.head.is_some()
    }
}

impl<R: Send + 'static> Drop for Context<R> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            // Work handed to the dispatcher is never silently lost: an
            // un-ended chain is scheduled on drop.
            inner.seal();
        }
    }
}

impl<R: Send + 'static> std::fmt::Debug for Context<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("chainable", &self.is_chainable())
            .finish_non_exhaustive()
    }
}

/// Creates the pieces every posted coroutine shares.
pub(crate) fn new_chain<R: Send + 'static>() -> (Arc<ChainState<R>>, TaskFuture<R>) {
    let slot = FutureSlot::new();
    let chain = ChainState::new(Arc::clone(&slot));
    (chain, TaskFuture::from_slot(slot))
}

//! Continuation chains.
//!
//! Every coroutine belongs to a chain, even a single-task one. The chain
//! owns the pending links, the value slot written by
//! [`CoroHandle::set`](crate::CoroHandle::set), and the terminal future
//! observed by the caller. When a link finishes, the owning worker asks
//! the chain for the next link to enqueue:
//!
//! 1. status `0`: error-handling links are skipped; the next `then` or
//!    `finally` link runs.
//! 2. status non-zero: regular links are skipped; the next `on_error` or
//!    `finally` link runs. With none left, the terminal future fails.
//! 3. A `finally` link is terminal. After it finishes the chain resolves,
//!    delivering a still-unhandled error in preference to the value.
//!
//! The terminal future resolves exactly once: the chain's current value
//! on success (or `BrokenPromise` when no link ever set one), otherwise
//! the first unhandled error.

use crate::error::{Error, ErrorKind, Result};
use crate::future::FutureSlot;
use crate::task::coro::CoroHandle;
use crate::task::CoroTask;
use crate::types::QueueId;
use smallvec::SmallVec;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

/// Where a task (or chain link) should be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub(crate) queue: QueueId,
    pub(crate) high_priority: bool,
}

/// Continuation class of a chain link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkClass {
    /// Runs on the success path.
    Then,
    /// Runs on the error path; returning `0` resumes the success path.
    OnError,
    /// Runs on both paths and terminates the chain.
    Finally,
}

/// Deferred link body: invoked with the link's handle when it is about
/// to be enqueued.
pub(crate) type Starter<R> =
    Box<dyn FnOnce(CoroHandle<R>) -> Pin<Box<dyn Future<Output = i32> + Send>> + Send>;

pub(crate) struct ChainLink<R: Send + 'static> {
    pub(crate) class: LinkClass,
    pub(crate) placement: Placement,
    pub(crate) starter: Starter<R>,
}

/// What the worker should do after a link finished.
pub(crate) enum LinkOutcome {
    /// The chain resolved; nothing further to run.
    Done,
    /// Enqueue this successor.
    Next(CoroTask, Placement),
}

/// Type-erased chain interface the worker drives.
pub(crate) trait ChainDriver: Send + Sync {
    /// Advances the chain after the running link finished with `status`.
    fn finish_link(&self, status: i32) -> LinkOutcome;
    /// Fails the terminal future (abandonment, rejected enqueue).
    fn fail(&self, error: Error);
}

struct LinkProgress<R: Send + 'static> {
    pending: SmallVec<[ChainLink<R>; 4]>,
    /// Class of the link currently handed out to a worker.
    running: LinkClass,
    /// Error awaiting delivery once a terminal `finally` link finishes.
    carried_error: Option<Error>,
    has_finally: bool,
    sealed: bool,
}

/// Shared state of one continuation chain.
pub(crate) struct ChainState<R: Send + 'static> {
    weak_self: Weak<ChainState<R>>,
    slot: Arc<FutureSlot<R>>,
    /// The chain's current value; each link's `set` overwrites it.
    value: Mutex<Option<R>>,
    /// Error visible to a running `on_error` handler.
    active_error: Mutex<Option<Error>>,
    links: Mutex<LinkProgress<R>>,
}

impl<R: Send + 'static> ChainState<R> {
    pub(crate) fn new(slot: Arc<FutureSlot<R>>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            slot,
            value: Mutex::new(None),
            active_error: Mutex::new(None),
            links: Mutex::new(LinkProgress {
                pending: SmallVec::new(),
                running: LinkClass::Then,
                carried_error: None,
                has_finally: false,
                sealed: false,
            }),
        })
    }

    pub(crate) fn slot(&self) -> &Arc<FutureSlot<R>> {
        &self.slot
    }

    /// Appends a link. Fails once the chain is sealed or already carries
    /// a terminal `finally` link.
    pub(crate) fn push_link(&self, link: ChainLink<R>) -> Result<()> {
        let mut progress = self.links.lock().unwrap();
        if progress.sealed {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_context("chain is sealed; the head has been scheduled"));
        }
        if progress.has_finally {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_context("cannot attach links after a finally link"));
        }
        if link.class == LinkClass::Finally {
            progress.has_finally = true;
        }
        progress.pending.push(link);
        Ok(())
    }

    /// Seals the chain and builds the head task. No further links may be
    /// attached afterwards.
    pub(crate) fn seal_head(self: &Arc<Self>, starter: Starter<R>) -> CoroTask {
        {
            let mut progress = self.links.lock().unwrap();
            debug_assert!(!progress.sealed, "chain sealed twice");
            progress.sealed = true;
            progress.running = LinkClass::Then;
        }
        let future = starter(CoroHandle::new(Arc::clone(self)));
        CoroTask::new(future, Arc::clone(self) as Arc<dyn ChainDriver>)
    }

    /// Overwrites the chain's current value.
    pub(crate) fn set_value(&self, value: R) {
        *self.value.lock().unwrap() = Some(value);
    }

    /// The error a running `on_error` handler is responding to.
    pub(crate) fn active_error(&self) -> Option<Error> {
        self.active_error.lock().unwrap().clone()
    }

    fn resolve(&self, error: Option<Error>) {
        match error {
            Some(error) => self.slot.fail(error),
            None => match self.value.lock().unwrap().take() {
                Some(value) => self.slot.fulfill(value),
                None => self.slot.fail(Error::new(ErrorKind::BrokenPromise)),
            },
        }
    }
}

impl<R: Send + 'static> ChainDriver for ChainState<R> {
    fn finish_link(&self, status: i32) -> LinkOutcome {
        let mut progress = self.links.lock().unwrap();
        let finished = progress.running;

        if finished == LinkClass::OnError && status == 0 {
            // The handler absorbed the error; back on the success path.
            *self.active_error.lock().unwrap() = None;
        }

        if finished == LinkClass::Finally {
            let error = progress.carried_error.take().or_else(|| {
                (status != 0).then(|| Error::user(status))
            });
            drop(progress);
            self.resolve(error);
            return LinkOutcome::Done;
        }

        let mut error = (status != 0).then(|| Error::user(status));
        loop {
            if progress.pending.is_empty() {
                drop(progress);
                self.resolve(error);
                return LinkOutcome::Done;
            }
            let link = progress.pending.remove(0);
            let eligible = match link.class {
                LinkClass::Then => error.is_none(),
                LinkClass::OnError => error.is_some(),
                LinkClass::Finally => true,
            };
            if !eligible {
                // A passed link is behind the chain's progress point and
                // never becomes eligible again.
                continue;
            }
            if let Some(err) = error.take() {
                if link.class == LinkClass::Finally {
                    progress.carried_error = Some(err);
                } else {
                    *self.active_error.lock().unwrap() = Some(err);
                }
            }
            progress.running = link.class;
            let placement = link.placement;
            drop(progress);

            let this = self
                .weak_self
                .upgrade()
                .expect("chain outlives its running links");
            let future = (link.starter)(CoroHandle::new(Arc::clone(&this)));
            let task = CoroTask::new(future, this as Arc<dyn ChainDriver>);
            return LinkOutcome::Next(task, placement);
        }
    }

    fn fail(&self, error: Error) {
        self.slot.fail(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::TaskFuture;
    use std::task::Poll;

    fn placement() -> Placement {
        Placement {
            queue: QueueId::Any,
            high_priority: false,
        }
    }

    fn link(class: LinkClass, status: i32) -> ChainLink<i32> {
        ChainLink {
            class,
            placement: placement(),
            starter: Box::new(move |_handle| Box::pin(async move { status })),
        }
    }

    /// Runs the chain to completion the way a worker would, driving each
    /// handed-out link synchronously.
    fn run_chain(chain: &Arc<ChainState<i32>>, head_status: i32) {
        let mut task = chain.seal_head(Box::new(move |_handle| {
            Box::pin(async move { head_status })
        }));
        loop {
            let status = match task.poll_once() {
                Poll::Ready(status) => status,
                Poll::Pending => continue,
            };
            match task.driver.clone().finish_link(status) {
                LinkOutcome::Done => break,
                LinkOutcome::Next(next, _placement) => task = next,
            }
        }
    }

    #[test]
    fn single_link_success_needs_set() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(Arc::clone(&slot));
        chain.set_value(42);
        run_chain(&chain, 0);
        assert_eq!(TaskFuture::from_slot(slot).get().unwrap(), 42);
    }

    #[test]
    fn success_without_set_is_a_broken_promise() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(Arc::clone(&slot));
        run_chain(&chain, 0);
        assert_eq!(
            TaskFuture::from_slot(slot).get().unwrap_err().kind(),
            ErrorKind::BrokenPromise
        );
    }

    #[test]
    fn unhandled_error_reaches_the_terminal_future() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(Arc::clone(&slot));
        chain.push_link(link(LinkClass::Then, 0)).unwrap();
        run_chain(&chain, 17);
        assert_eq!(
            TaskFuture::from_slot(slot).get().unwrap_err().kind(),
            ErrorKind::User(17)
        );
    }

    #[test]
    fn on_error_absorbs_and_chain_continues() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(Arc::clone(&slot));
        // head errs -> skip then -> on_error absorbs -> final then sets value
        chain.push_link(link(LinkClass::Then, 0)).unwrap();
        chain.push_link(link(LinkClass::OnError, 0)).unwrap();
        chain
            .push_link(ChainLink {
                class: LinkClass::Then,
                placement: placement(),
                starter: Box::new(move |handle| {
                    Box::pin(async move {
                        handle.set(99);
                        0
                    })
                }),
            })
            .unwrap();
        run_chain(&chain, 5);
        assert_eq!(TaskFuture::from_slot(slot).get().unwrap(), 99);
    }

    #[test]
    fn on_error_sees_the_active_error() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(Arc::clone(&slot));
        let observed = Arc::new(Mutex::new(None));
        let observed_in_link = Arc::clone(&observed);
        chain
            .push_link(ChainLink {
                class: LinkClass::OnError,
                placement: placement(),
                starter: Box::new(move |handle| {
                    Box::pin(async move {
                        *observed_in_link.lock().unwrap() = handle.chain_error();
                        handle.set(0);
                        0
                    })
                }),
            })
            .unwrap();
        run_chain(&chain, 8);
        assert_eq!(
            observed.lock().unwrap().as_ref().unwrap().kind(),
            ErrorKind::User(8)
        );
    }

    #[test]
    fn finally_runs_on_error_path_and_error_still_delivered() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(Arc::clone(&slot));
        let ran = Arc::new(Mutex::new(false));
        let ran_in_link = Arc::clone(&ran);
        chain
            .push_link(ChainLink {
                class: LinkClass::Finally,
                placement: placement(),
                starter: Box::new(move |handle| {
                    Box::pin(async move {
                        *ran_in_link.lock().unwrap() = true;
                        handle.set(1);
                        0
                    })
                }),
            })
            .unwrap();
        run_chain(&chain, 3);
        assert!(*ran.lock().unwrap());
        assert_eq!(
            TaskFuture::from_slot(slot).get().unwrap_err().kind(),
            ErrorKind::User(3)
        );
    }

    #[test]
    fn no_links_after_finally() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(slot);
        chain.push_link(link(LinkClass::Finally, 0)).unwrap();
        let err = chain.push_link(link(LinkClass::Then, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn no_links_after_seal() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(slot);
        let _task = chain.seal_head(Box::new(|_handle| Box::pin(async { 0 })));
        let err = chain.push_link(link(LinkClass::Then, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn fail_resolves_the_terminal_future() {
        let slot = FutureSlot::new();
        let chain = ChainState::<i32>::new(Arc::clone(&slot));
        chain.fail(Error::new(ErrorKind::Terminated));
        assert!(TaskFuture::from_slot(slot).get().unwrap_err().is_terminated());
    }
}

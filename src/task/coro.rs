//! The coroutine context handle and its await points.
//!
//! A coroutine body receives a [`CoroHandle`] as its argument. The handle
//! is the coroutine's door back into the scheduler: yielding, cooperative
//! sleeping, waiting on other tasks' futures, and fulfilling the chain's
//! result.
//!
//! Suspension is the poll protocol: every await point here returns
//! `Pending` to hand control back to the home worker, which pushes the
//! coroutine onto the tail of its current priority section. Resumption
//! therefore always happens on the same worker.

use crate::error::Error;
use crate::future::TaskFuture;
use crate::runtime::core::current_worker;
use crate::task::chain::ChainState;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

/// The scheduler never sleeps on wakers: a `Pending` poll requeues the
/// coroutine directly, so the waker has nothing to do.
struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

pub(crate) fn noop_waker() -> Waker {
    static WAKER: OnceLock<Waker> = OnceLock::new();
    WAKER
        .get_or_init(|| Waker::from(Arc::new(NoopWake)))
        .clone()
}

/// The coroutine's handle to itself and to the scheduler.
///
/// Cloneable and sendable; a coroutine may hand its own handle to helper
/// futures it composes.
pub struct CoroHandle<R: Send + 'static> {
    chain: Arc<ChainState<R>>,
}

impl<R: Send + 'static> Clone for CoroHandle<R> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<R: Send + 'static> CoroHandle<R> {
    pub(crate) fn new(chain: Arc<ChainState<R>>) -> Self {
        Self { chain }
    }

    /// Fulfills the task's result.
    ///
    /// In a chain, each link may overwrite the value; the last one set
    /// before the chain resolves is what the terminal future observes.
    /// A chain that resolves successfully without any `set` fails with
    /// [`BrokenPromise`](crate::ErrorKind::BrokenPromise).
    pub fn set(&self, value: R) {
        self.chain.set_value(value);
    }

    /// Suspends the coroutine, returning control to its worker.
    ///
    /// The coroutine resumes on the same worker, after the tasks ahead of
    /// it in its priority section have had their turn.
    #[must_use]
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    /// Cooperative sleep: yields until `duration` has elapsed.
    ///
    /// Unlike `std::thread::sleep` this never blocks the worker thread;
    /// other coroutines on the same worker keep running.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep {
            deadline: Instant::now() + duration,
        }
    }

    /// Cooperative wait: yields until `future` is ready.
    ///
    /// This is the coroutine-safe alternative to
    /// [`TaskFuture::wait`], which would block the worker thread.
    pub fn await_ready<'a, T>(&self, future: &'a TaskFuture<T>) -> AwaitReady<'a, T> {
        AwaitReady { future }
    }

    /// The terminal future of this task's chain.
    #[must_use]
    pub fn task_future(&self) -> TaskFuture<R> {
        TaskFuture::from_slot(Arc::clone(self.chain.slot()))
    }

    /// The error a running `on_error` link is handling, if any.
    #[must_use]
    pub fn chain_error(&self) -> Option<Error> {
        self.chain.active_error()
    }

    /// The id of the queue this coroutine is currently running on.
    ///
    /// `None` when called from outside a worker thread (e.g. from a test
    /// driving the future by hand).
    #[must_use]
    pub fn queue_id(&self) -> Option<usize> {
        current_worker().map(|worker| worker.queue)
    }
}

impl<R: Send + 'static> std::fmt::Debug for CoroHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroHandle").finish_non_exhaustive()
    }
}

/// Await point that suspends exactly once. See [`CoroHandle::yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}

/// Await point that suspends until a deadline. See [`CoroHandle::sleep`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    deadline: Instant,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Await point that suspends until an observed future resolves. See
/// [`CoroHandle::await_ready`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct AwaitReady<'a, T> {
    future: &'a TaskFuture<T>,
}

impl<T> Future for AwaitReady<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.future.is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

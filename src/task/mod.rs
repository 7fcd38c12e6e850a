//! Task control blocks and the two task variants.
//!
//! A [`TaskCell`] is the unit a queue holds: a task id, its priority
//! class, and the payload. Coroutine payloads carry a type-erased
//! resumable future plus the continuation chain driving it; I/O payloads
//! carry a one-shot closure already bound to its promise.

pub(crate) mod chain;
pub mod coro;
pub mod io;

use self::chain::ChainDriver;
use crate::error::Error;
use crate::future::FutureSlot;
use crate::types::TaskId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

/// Something that can deliver a failure to a task's observers after the
/// task itself will never run (terminate, rejected enqueue).
pub(crate) trait FailTarget: Send + Sync {
    fn fail(&self, error: Error);
}

impl<T: Send> FailTarget for FutureSlot<T> {
    fn fail(&self, error: Error) {
        FutureSlot::fail(self, error);
    }
}

/// A resumable coroutine: a boxed future polled by its home worker.
pub(crate) struct CoroTask {
    future: Pin<Box<dyn Future<Output = i32> + Send>>,
    /// The chain this task is a link of; drives continuation handoff.
    pub(crate) driver: Arc<dyn ChainDriver>,
    /// Poll count; zero means the task has not started yet.
    pub(crate) polls: u64,
}

impl CoroTask {
    pub(crate) fn new(
        future: Pin<Box<dyn Future<Output = i32> + Send>>,
        driver: Arc<dyn ChainDriver>,
    ) -> Self {
        Self {
            future,
            driver,
            polls: 0,
        }
    }

    /// Polls the coroutine once. `Pending` means it yielded.
    pub(crate) fn poll_once(&mut self) -> Poll<i32> {
        self.polls += 1;
        let waker = coro::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        self.future.as_mut().poll(&mut cx)
    }
}

/// A one-shot blocking task, bound to its promise at construction.
pub(crate) struct IoWork {
    /// Runs the user callable and settles the promise; returns the status.
    pub(crate) run: Box<dyn FnOnce() -> i32 + Send>,
    /// Failure route for abandonment before the closure ever runs.
    pub(crate) slot: Arc<dyn FailTarget>,
}

pub(crate) enum TaskPayload {
    Coro(CoroTask),
    Io(IoWork),
}

/// The queued control block.
pub(crate) struct TaskCell {
    pub(crate) id: TaskId,
    pub(crate) high_priority: bool,
    pub(crate) payload: TaskPayload,
}

impl TaskCell {
    pub(crate) fn new(high_priority: bool, payload: TaskPayload) -> Self {
        Self {
            id: TaskId::next(),
            high_priority,
            payload,
        }
    }

    /// Fails the task's observers without running it.
    pub(crate) fn fail(self, error: Error) {
        match self.payload {
            TaskPayload::Coro(task) => task.driver.fail(error),
            TaskPayload::Io(work) => work.slot.fail(error),
        }
    }
}

impl std::fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCell")
            .field("id", &self.id)
            .field("high_priority", &self.high_priority)
            .field(
                "kind",
                &match self.payload {
                    TaskPayload::Coro(_) => "coro",
                    TaskPayload::Io(_) => "io",
                },
            )
            .finish()
    }
}

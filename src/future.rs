//! Single-assignment result slots shared between a task and its observers.
//!
//! A [`TaskPromise`] is the producer half: the running task (or the
//! dispatcher, when abandoning work) resolves it exactly once with a value
//! or an error. A [`TaskFuture`] is the consumer half: any number of
//! clones may wait on, poll, or read the resolution. All observers see the
//! same outcome.
//!
//! Waiting is a mutex/condvar pair; resolution notifies every waiter.

use crate::error::{Error, ErrorKind, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// The slot's lifecycle. `Taken` is reached only through
/// [`TaskFuture::take`].
enum SlotState<T> {
    Empty,
    Value(T),
    Failed(Error),
    Taken,
}

pub(crate) struct FutureSlot<T> {
    state: Mutex<SlotState<T>>,
    cv: Condvar,
}

impl<T> FutureSlot<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Empty),
            cv: Condvar::new(),
        })
    }

    /// First write wins; later writes are ignored.
    pub(crate) fn fulfill(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, SlotState::Empty) {
            *state = SlotState::Value(value);
            drop(state);
            self.cv.notify_all();
        }
    }

    /// First write wins; later writes are ignored.
    pub(crate) fn fail(&self, error: Error) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, SlotState::Empty) {
            *state = SlotState::Failed(error);
            drop(state);
            self.cv.notify_all();
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        !matches!(*self.state.lock().unwrap(), SlotState::Empty)
    }

    fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        while matches!(*state, SlotState::Empty) {
            state = self.cv.wait(state).unwrap();
        }
    }

    fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while matches!(*state, SlotState::Empty) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _timeout) = self.cv.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
        true
    }

    fn take(&self) -> Option<Result<T>> {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Value(value) => Some(Ok(value)),
            SlotState::Failed(error) => {
                // Errors stay observable for other holders.
                *state = SlotState::Failed(error.clone());
                Some(Err(error))
            }
            SlotState::Empty => {
                *state = SlotState::Empty;
                None
            }
            SlotState::Taken => Some(Err(Error::new(ErrorKind::InvalidState)
                .with_context("future value already taken"))),
        }
    }
}

impl<T: Clone> FutureSlot<T> {
    fn read(&self) -> Option<Result<T>> {
        match &*self.state.lock().unwrap() {
            SlotState::Value(value) => Some(Ok(value.clone())),
            SlotState::Failed(error) => Some(Err(error.clone())),
            SlotState::Empty => None,
            SlotState::Taken => Some(Err(Error::new(ErrorKind::InvalidState)
                .with_context("future value already taken"))),
        }
    }
}

/// The write half of a result slot.
///
/// A promise is resolved at most once; the first `set` or `fail` wins and
/// wakes every waiter.
pub struct TaskPromise<T> {
    slot: Arc<FutureSlot<T>>,
}

impl<T> TaskPromise<T> {
    pub(crate) fn from_slot(slot: Arc<FutureSlot<T>>) -> Self {
        Self { slot }
    }

    /// Fulfills the slot with a value. Ignored if already resolved.
    pub fn set(&self, value: T) {
        self.slot.fulfill(value);
    }

    /// Fails the slot with an error. Ignored if already resolved.
    pub fn fail(&self, error: Error) {
        self.slot.fail(error);
    }

    /// Returns true if the slot has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.slot.is_ready()
    }
}

impl<T> std::fmt::Debug for TaskPromise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPromise")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// The read half of a result slot.
///
/// Clones share the slot; every clone observes the same value or error.
pub struct TaskFuture<T> {
    slot: Arc<FutureSlot<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> TaskFuture<T> {
    pub(crate) fn from_slot(slot: Arc<FutureSlot<T>>) -> Self {
        Self { slot }
    }

    /// Returns true if the task has resolved the slot.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }

    /// Blocks until the slot is resolved.
    pub fn wait(&self) {
        self.slot.wait();
    }

    /// Blocks until the slot is resolved or `timeout` elapses.
    ///
    /// Returns true if the slot resolved in time.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.slot.wait_for(timeout)
    }

    /// Waits for resolution and moves the value out.
    ///
    /// At most one holder can take the value; later takers observe
    /// [`ErrorKind::InvalidState`]. Errors remain observable by every
    /// holder.
    pub fn take(self) -> Result<T> {
        self.slot.wait();
        self.slot
            .take()
            .expect("resolved slot must yield an outcome")
    }

    /// Polls for the value without blocking, moving it out when ready.
    #[must_use]
    pub fn try_take(&self) -> Option<Result<T>> {
        self.slot.take()
    }
}

impl<T: Clone> TaskFuture<T> {
    /// Waits for resolution and returns a copy of the outcome, leaving
    /// the slot readable by other holders.
    pub fn get(&self) -> Result<T> {
        self.slot.wait();
        self.slot
            .read()
            .expect("resolved slot must yield an outcome")
    }

    /// Polls for the outcome without blocking or consuming it.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T>> {
        if self.slot.is_ready() {
            self.slot.read()
        } else {
            None
        }
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Creates a linked promise/future pair.
#[cfg(test)]
pub(crate) fn promise_pair<T>() -> (TaskPromise<T>, TaskFuture<T>) {
    let slot = FutureSlot::new();
    (
        TaskPromise::from_slot(Arc::clone(&slot)),
        TaskFuture::from_slot(slot),
    )
}

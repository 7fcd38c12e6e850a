//! Blocking I/O tasks.
//!
//! An I/O task is a one-shot callable `FnOnce(IoPromise<R>) -> i32` run
//! to completion on an I/O worker. The promise is the task's only way to
//! produce a value; the status code reports success (`0`) or a user
//! error.

use crate::error::{Error, ErrorKind};
use crate::future::{FutureSlot, TaskFuture, TaskPromise};
use crate::task::{FailTarget, IoWork};
use std::sync::Arc;

/// The write half handed to an I/O task body.
///
/// Same single-assignment semantics as [`TaskPromise`]: the first `set`
/// wins.
pub type IoPromise<T> = TaskPromise<T>;

/// Wraps a user I/O callable into queueable work plus the future its
/// caller observes.
///
/// Status handling after the callable returns, in order:
/// - non-zero status fails the future with `User(code)` (ignored if the
///   task already set a value);
/// - status `0` with no value set fails it with `BrokenPromise`.
pub(crate) fn wrap_io_task<R, F>(f: F) -> (IoWork, TaskFuture<R>)
where
    R: Send + 'static,
    F: FnOnce(IoPromise<R>) -> i32 + Send + 'static,
{
    let slot = FutureSlot::new();
    let run_slot = Arc::clone(&slot);
    let run = Box::new(move || {
        let status = f(TaskPromise::from_slot(Arc::clone(&run_slot)));
        match status {
            0 => run_slot.fail(Error::new(ErrorKind::BrokenPromise)),
            code => run_slot.fail(Error::user(code)),
        }
        status
    });
    let work = IoWork {
        run,
        slot: Arc::clone(&slot) as Arc<dyn FailTarget>,
    };
    (work, TaskFuture::from_slot(slot))
}

//! The per-worker task queue.
//!
//! Each worker owns exactly one queue. A queue has two FIFO sections:
//! the high-priority section drains strictly before the normal section.
//! Many producers may push (posts can come from any thread and from
//! tasks on other workers); only the owning worker pops.
//!
//! Resident control blocks live in the queue's [`SlabPool`], so the hot
//! enqueue path does not hit the global allocator until the slab
//! overflows.
//!
//! `size` counts resident tasks *including* the currently executing one:
//! it is incremented on push and decremented only when a task finishes
//! or is abandoned, not on pop. A suspended coroutine that is requeued
//! never leaves the count.

use crate::error::{Error, ErrorKind};
use crate::pool::{Pooled, SlabPool};
use crate::runtime::stats::{QueueCounters, QueueStatistics};
use crate::task::TaskCell;
use crate::types::PoolKind;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use tracing::trace;

struct Sections {
    high: VecDeque<Pooled<TaskCell>>,
    normal: VecDeque<Pooled<TaskCell>>,
}

impl Sections {
    fn pop_next(&mut self) -> Option<Pooled<TaskCell>> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }
}

/// A two-section MPSC task queue pinned to one worker.
pub(crate) struct TaskQueue {
    id: usize,
    kind: PoolKind,
    sections: Mutex<Sections>,
    cv: Condvar,
    /// Resident tasks, including the one currently executing.
    size: AtomicUsize,
    shutdown: AtomicBool,
    drain_on_shutdown: AtomicBool,
    counters: QueueCounters,
    pool: SlabPool<TaskCell>,
}

impl TaskQueue {
    pub(crate) fn new(
        id: usize,
        kind: PoolKind,
        slab_capacity: usize,
        slab_heap_limit: Option<usize>,
    ) -> Self {
        Self {
            id,
            kind,
            sections: Mutex::new(Sections {
                high: VecDeque::new(),
                normal: VecDeque::new(),
            }),
            cv: Condvar::new(),
            size: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            drain_on_shutdown: AtomicBool::new(false),
            counters: QueueCounters::new(),
            pool: SlabPool::with_heap_limit(slab_capacity, slab_heap_limit),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Admits a new task.
    ///
    /// Fails with `InvalidState` once the queue is shut down and with
    /// `ResourceExhausted` when the control-block pool is exhausted.
    pub(crate) fn push(&self, cell: TaskCell) -> crate::error::Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::InvalidState).with_context("queue is shut down"));
        }
        let high = cell.high_priority;
        trace!(queue = self.id, kind = %self.kind, task = %cell.id, high, "enqueue");
        let pooled = self.pool.try_create(cell)?;
        {
            let mut sections = self.sections.lock().unwrap();
            if high {
                sections.high.push_back(pooled);
            } else {
                sections.normal.push_back(pooled);
            }
        }
        self.size.fetch_add(1, Ordering::AcqRel);
        self.counters.mark_posted(high);
        self.cv.notify_one();
        Ok(())
    }

    /// Puts a suspended task back at the tail of its priority section.
    ///
    /// Always succeeds: the task was already admitted, so its residency
    /// is not re-counted and the slab's heap limit does not apply.
    pub(crate) fn requeue(&self, cell: TaskCell) {
        let high = cell.high_priority;
        let pooled = self.pool.create(cell);
        let mut sections = self.sections.lock().unwrap();
        if high {
            sections.high.push_back(pooled);
        } else {
            sections.normal.push_back(pooled);
        }
    }

    /// Takes the next task, blocking while the queue is empty.
    ///
    /// Returns `None` when the worker should exit: immediately after a
    /// fast shutdown, or once the queue is empty after a draining
    /// shutdown.
    pub(crate) fn pop_blocking(&self) -> Option<TaskCell> {
        let mut sections = self.sections.lock().unwrap();
        loop {
            let draining = self.drain_on_shutdown.load(Ordering::Acquire);
            if self.shutdown.load(Ordering::Acquire) && !draining {
                return None;
            }
            if let Some(pooled) = sections.pop_next() {
                return Some(pooled.into_inner());
            }
            if self.shutdown.load(Ordering::Acquire) {
                // Draining shutdown and nothing left.
                return None;
            }
            sections = self.cv.wait(sections).unwrap();
        }
    }

    /// Books a finished (or failed) task out of the residency count.
    pub(crate) fn task_finished(&self, ok: bool) {
        self.size.fetch_sub(1, Ordering::AcqRel);
        self.counters.mark_completed(ok);
    }

    /// Resident tasks, including the currently executing one.
    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub(crate) fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    pub(crate) fn stats(&self) -> QueueStatistics {
        self.counters.snapshot(self.size())
    }

    /// Signals the worker to exit, optionally after draining what is
    /// queued.
    pub(crate) fn shutdown(&self, drain: bool) {
        self.drain_on_shutdown.store(drain, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        let _sections = self.sections.lock().unwrap();
        self.cv.notify_all();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Empties both sections after the worker has exited, returning the
    /// abandoned tasks so their futures can be failed. Resets residency.
    pub(crate) fn drain_remaining(&self) -> Vec<TaskCell> {
        let mut sections = self.sections.lock().unwrap();
        let mut remaining = Vec::with_capacity(sections.len());
        while let Some(pooled) = sections.pop_next() {
            remaining.push(pooled.into_inner());
        }
        drop(sections);
        for _ in &remaining {
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.counters.mark_abandoned();
        }
        remaining
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskCell, TaskPayload};
    use std::sync::Arc;
    use std::time::Duration;

    fn io_cell(high: bool, tag: i32) -> (TaskCell, crate::future::TaskFuture<i32>) {
        let (work, future) = crate::task::io::wrap_io_task(move |promise| {
            promise.set(tag);
            0
        });
        (TaskCell::new(high, TaskPayload::Io(work)), future)
    }

    fn tag_of(cell: TaskCell) -> i32 {
        match cell.payload {
            TaskPayload::Io(work) => {
                let _ = (work.run)();
                0
            }
            TaskPayload::Coro(_) => unreachable!("io-only test"),
        }
    }

    #[test]
    fn high_section_drains_before_normal() {
        let queue = TaskQueue::new(0, PoolKind::Coro, 8, None);
        let (n1, f1) = io_cell(false, 1);
        let (n2, f2) = io_cell(false, 2);
        let (h1, f3) = io_cell(true, 3);
        queue.push(n1).unwrap();
        queue.push(n2).unwrap();
        queue.push(h1).unwrap();

        // High first, then normals in FIFO order.
        for expected in [&f3, &f1, &f2] {
            let cell = queue.pop_blocking().unwrap();
            tag_of(cell);
            assert!(expected.is_ready());
            queue.task_finished(true);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn size_includes_the_executing_task() {
        let queue = TaskQueue::new(0, PoolKind::Coro, 4, None);
        let (cell, _future) = io_cell(false, 0);
        queue.push(cell).unwrap();
        assert_eq!(queue.size(), 1);
        let cell = queue.pop_blocking().unwrap();
        // Popped but not finished: still resident.
        assert_eq!(queue.size(), 1);
        drop(cell);
        queue.task_finished(true);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn fast_shutdown_leaves_tasks_behind() {
        let queue = TaskQueue::new(0, PoolKind::Coro, 4, None);
        let (cell, future) = io_cell(false, 0);
        queue.push(cell).unwrap();
        queue.shutdown(false);
        assert!(queue.pop_blocking().is_none());
        let remaining = queue.drain_remaining();
        assert_eq!(remaining.len(), 1);
        for cell in remaining {
            cell.fail(Error::new(ErrorKind::Terminated));
        }
        assert!(future.get().unwrap_err().is_terminated());
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn draining_shutdown_serves_whats_left() {
        let queue = TaskQueue::new(0, PoolKind::Coro, 4, None);
        let (cell, _future) = io_cell(false, 0);
        queue.push(cell).unwrap();
        queue.shutdown(true);
        assert!(queue.pop_blocking().is_some());
        queue.task_finished(true);
        assert!(queue.pop_blocking().is_none());
    }

    #[test]
    fn push_after_shutdown_is_rejected() {
        let queue = TaskQueue::new(0, PoolKind::Coro, 4, None);
        queue.shutdown(false);
        let (cell, _future) = io_cell(false, 0);
        assert_eq!(
            queue.push(cell).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn pop_blocks_until_a_producer_arrives() {
        let queue = Arc::new(TaskQueue::new(0, PoolKind::Coro, 4, None));
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_blocking().is_some())
        };
        std::thread::sleep(Duration::from_millis(20));
        let (cell, _future) = io_cell(false, 0);
        queue.push(cell).unwrap();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn control_blocks_come_from_the_slab() {
        let queue = TaskQueue::new(0, PoolKind::Coro, 4, None);
        let (cell, _future) = io_cell(false, 0);
        queue.push(cell).unwrap();
        // One resident control block, no heap fallback.
        assert_eq!(queue.pool.allocated_blocks(), 1);
        assert_eq!(queue.pool.allocated_heap_blocks(), 0);
        let cell = queue.pop_blocking().unwrap();
        assert_eq!(queue.pool.allocated_blocks(), 0);
        drop(cell);
    }
}

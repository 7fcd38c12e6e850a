//! Worker threads.
//!
//! One thread per queue. Coroutine workers poll resumable tasks: a
//! `Pending` poll is a yield and puts the task back at the tail of its
//! priority section; a `Ready` poll finishes the task and walks its
//! continuation chain. I/O workers run the same loop; their tasks have
//! no resumable state and always finish in one go.
//!
//! High-priority work never preempts: it runs when the current task
//! yields or finishes.

use crate::runtime::config::DispatcherConfig;
use crate::runtime::core::{Shared, WorkerRegistration, WorkerSlot};
use crate::runtime::queue::TaskQueue;
use crate::task::chain::LinkOutcome;
use crate::task::{TaskCell, TaskPayload};
use crate::types::PoolKind;
use std::sync::Arc;
use std::task::Poll;
use std::thread::JoinHandle;
use tracing::{trace, warn};

pub(crate) fn spawn_worker(
    shared: Arc<Shared>,
    queue: Arc<TaskQueue>,
    kind: PoolKind,
    index: usize,
    core_id: Option<core_affinity::CoreId>,
    config: &DispatcherConfig,
) -> JoinHandle<()> {
    let pool_tag = match kind {
        PoolKind::Coro => "coro",
        PoolKind::Io => "io",
        PoolKind::All => unreachable!("workers belong to one pool"),
    };
    let name = format!("{}-{pool_tag}-{index}", config.thread_name_prefix);
    std::thread::Builder::new()
        .name(name)
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            let _registration = WorkerRegistration::enter(WorkerSlot {
                dispatcher: shared.id,
                kind,
                queue: index,
            });
            if let Some(core) = core_id {
                core_affinity::set_for_current(core);
            }
            worker_loop(&shared, &queue);
        })
        .expect("failed to spawn worker thread")
}

fn worker_loop(shared: &Arc<Shared>, queue: &Arc<TaskQueue>) {
    while let Some(cell) = queue.pop_blocking() {
        let TaskCell {
            id,
            high_priority,
            payload,
        } = cell;
        match payload {
            TaskPayload::Coro(mut task) => {
                if task.polls == 0 {
                    queue.counters().mark_started();
                } else {
                    queue.counters().mark_resumed();
                }
                match task.poll_once() {
                    Poll::Pending => {
                        trace!(queue = queue.id(), task = %id, "yield");
                        queue.counters().mark_yielded();
                        queue.requeue(TaskCell {
                            id,
                            high_priority,
                            payload: TaskPayload::Coro(task),
                        });
                        // Give producers (and siblings on other cores) a
                        // turn before re-polling a suspended task.
                        std::thread::yield_now();
                    }
                    Poll::Ready(status) => {
                        trace!(queue = queue.id(), task = %id, status, "finished");
                        let driver = Arc::clone(&task.driver);
                        drop(task);
                        match driver.finish_link(status) {
                            LinkOutcome::Done => {}
                            LinkOutcome::Next(next, placement) => {
                                let next_driver = Arc::clone(&next.driver);
                                if let Err(error) = shared.enqueue_coro(next, placement) {
                                    warn!(task = %id, %error, "continuation dropped");
                                    next_driver.fail(error);
                                }
                            }
                        }
                        // Booked out only after the successor (if any) is
                        // admitted: the dispatcher's total size must not
                        // read zero while a chain handoff is in flight,
                        // or a concurrent drain would observe a false
                        // quiescence.
                        queue.task_finished(status == 0);
                    }
                }
            }
            TaskPayload::Io(work) => {
                queue.counters().mark_started();
                let status = (work.run)();
                trace!(queue = queue.id(), task = %id, status, "io task finished");
                queue.task_finished(status == 0);
            }
        }
    }
}

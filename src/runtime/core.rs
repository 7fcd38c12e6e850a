//! The dispatcher core: pools, queue selection, and lifecycle.
//!
//! [`Shared`] is the state every handle and worker references: the two
//! queue sets, the round-robin hints, and the drain/terminate flags.
//! [`DispatcherCore`] owns the worker threads on top of it and runs the
//! drain and terminate protocols.
//!
//! Worker threads register themselves in a thread-local so that the
//! `Same` sentinel, the internal-post exemption during drain, and the
//! drain self-deadlock guard can identify the calling context.

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::config::{available_cores, DispatcherConfig};
use crate::runtime::queue::TaskQueue;
use crate::runtime::stats::QueueStatistics;
use crate::runtime::worker::spawn_worker;
use crate::task::chain::Placement;
use crate::task::{CoroTask, IoWork, TaskCell, TaskPayload};
use crate::types::{PoolKind, QueueId};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// How often `drain` re-checks for quiescence.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Identity of the worker thread currently executing, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerSlot {
    pub(crate) dispatcher: u64,
    pub(crate) kind: PoolKind,
    pub(crate) queue: usize,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerSlot>> = const { Cell::new(None) };
}

/// The worker identity of the calling thread, if it is a worker.
pub(crate) fn current_worker() -> Option<WorkerSlot> {
    CURRENT_WORKER.with(Cell::get)
}

/// Registers the calling thread as a worker for its lifetime.
pub(crate) struct WorkerRegistration;

impl WorkerRegistration {
    pub(crate) fn enter(slot: WorkerSlot) -> Self {
        CURRENT_WORKER.with(|current| current.set(Some(slot)));
        Self
    }
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|current| current.set(None));
    }
}

/// State shared by the facade, all handles, contexts, and workers.
pub(crate) struct Shared {
    pub(crate) id: u64,
    coro_queues: Vec<Arc<TaskQueue>>,
    io_queues: Vec<Arc<TaskQueue>>,
    coro_rr: AtomicUsize,
    io_rr: AtomicUsize,
    /// Number of `drain` calls in progress.
    drain_depth: AtomicUsize,
    terminated: AtomicBool,
}

impl Shared {
    fn new(config: &DispatcherConfig) -> Self {
        let make_queues = |count: usize, kind: PoolKind| {
            (0..count)
                .map(|id| {
                    Arc::new(TaskQueue::new(
                        id,
                        kind,
                        config.slab_capacity,
                        config.slab_heap_limit,
                    ))
                })
                .collect::<Vec<_>>()
        };
        Self {
            id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
            coro_queues: make_queues(config.coro_threads, PoolKind::Coro),
            io_queues: make_queues(config.io_threads, PoolKind::Io),
            coro_rr: AtomicUsize::new(0),
            io_rr: AtomicUsize::new(0),
            drain_depth: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        }
    }

    pub(crate) fn coro_threads(&self) -> usize {
        self.coro_queues.len()
    }

    pub(crate) fn io_threads(&self) -> usize {
        self.io_queues.len()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.drain_depth.load(Ordering::Acquire) > 0
    }

    /// True when the calling thread is one of this dispatcher's workers.
    pub(crate) fn on_own_worker(&self) -> bool {
        current_worker().is_some_and(|slot| slot.dispatcher == self.id)
    }

    /// Admission control shared by every post entry point.
    pub(crate) fn check_post(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(
                Error::new(ErrorKind::InvalidState).with_context("dispatcher is terminated")
            );
        }
        // Posts from inside an executing task stay legal during drain.
        if self.is_draining() && !self.on_own_worker() {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_context("drain in progress; external posts are rejected"));
        }
        Ok(())
    }

    /// Validates a post-time selector without resolving `Any`.
    pub(crate) fn validate_post_selector(&self, kind: PoolKind, queue: QueueId) -> Result<()> {
        let queues = self.pool_queues(kind);
        match queue {
            QueueId::Any | QueueId::Same => Ok(()),
            QueueId::Index(index) if index < queues.len() => Ok(()),
            QueueId::Index(index) => Err(Error::new(ErrorKind::InvalidArgument).with_context(
                format!("queue {index} out of range for {kind} pool of {}", queues.len()),
            )),
            QueueId::All => Err(Error::new(ErrorKind::InvalidArgument)
                .with_context("All is an aggregation selector, not a placement")),
        }
    }

    /// Resolves a post-time selector to a concrete queue index.
    pub(crate) fn select_queue(&self, kind: PoolKind, queue: QueueId) -> Result<usize> {
        let queues = self.pool_queues(kind);
        match queue {
            QueueId::Index(index) if index < queues.len() => Ok(index),
            QueueId::Index(index) => Err(Error::new(ErrorKind::InvalidArgument).with_context(
                format!("queue {index} out of range for {kind} pool of {}", queues.len()),
            )),
            QueueId::Any => {
                let rr = match kind {
                    PoolKind::Coro => &self.coro_rr,
                    PoolKind::Io => &self.io_rr,
                    PoolKind::All => unreachable!("placements target one pool"),
                };
                // Least-loaded queue; the rotating start index breaks
                // ties round-robin.
                let count = queues.len();
                let start = rr.fetch_add(1, Ordering::Relaxed) % count;
                let mut best = start;
                let mut best_size = queues[start].size();
                for offset in 1..count {
                    let index = (start + offset) % count;
                    let size = queues[index].size();
                    if size < best_size {
                        best = index;
                        best_size = size;
                    }
                }
                Ok(best)
            }
            QueueId::Same => current_worker()
                .filter(|slot| slot.dispatcher == self.id && slot.kind == kind)
                .map(|slot| slot.queue)
                .ok_or_else(|| {
                    Error::new(ErrorKind::InvalidArgument)
                        .with_context("Same is only valid from inside a task of the same pool")
                }),
            QueueId::All => Err(Error::new(ErrorKind::InvalidArgument)
                .with_context("All is an aggregation selector, not a placement")),
        }
    }

    /// Routes a coroutine (chain head or link) to its queue.
    pub(crate) fn enqueue_coro(&self, task: CoroTask, placement: Placement) -> Result<()> {
        let index = self.select_queue(PoolKind::Coro, placement.queue)?;
        let cell = TaskCell::new(placement.high_priority, TaskPayload::Coro(task));
        self.coro_queues[index].push(cell).map_err(|e| self.admission_error(e))
    }

    /// Routes a blocking task to its I/O queue.
    pub(crate) fn enqueue_io(&self, work: IoWork, placement: Placement) -> Result<()> {
        let index = self.select_queue(PoolKind::Io, placement.queue)?;
        let cell = TaskCell::new(placement.high_priority, TaskPayload::Io(work));
        self.io_queues[index].push(cell).map_err(|e| self.admission_error(e))
    }

    /// A queue rejection during terminate means the task was abandoned;
    /// its observers should see `Terminated`, not a queue-state error.
    fn admission_error(&self, error: Error) -> Error {
        if self.is_terminated() {
            Error::new(ErrorKind::Terminated)
        } else {
            error
        }
    }

    fn pool_queues(&self, kind: PoolKind) -> &[Arc<TaskQueue>] {
        match kind {
            PoolKind::Coro => &self.coro_queues,
            PoolKind::Io => &self.io_queues,
            PoolKind::All => &[],
        }
    }

    pub(crate) fn coro_queue(&self, index: usize) -> &Arc<TaskQueue> {
        &self.coro_queues[index]
    }

    pub(crate) fn io_queue(&self, index: usize) -> &Arc<TaskQueue> {
        &self.io_queues[index]
    }

    fn all_queues(&self) -> impl Iterator<Item = &Arc<TaskQueue>> {
        self.coro_queues.iter().chain(self.io_queues.iter())
    }

    pub(crate) fn total_size(&self) -> usize {
        self.all_queues().map(|queue| queue.size()).sum()
    }

    /// Resolves a query selector (`size`/`empty`/`stats`) to its scope.
    fn resolve_query(&self, kind: PoolKind, queue: QueueId) -> Result<QueryScope> {
        match (kind, queue) {
            (PoolKind::All, QueueId::All) => Ok(QueryScope::Both),
            (PoolKind::All, _) => Err(Error::new(ErrorKind::InvalidArgument)
                .with_context("queue id must be All when querying both pools")),
            (PoolKind::Coro, QueueId::All) => Ok(QueryScope::Pool(PoolKind::Coro)),
            // The I/O pool historically accepts Any as an alias for All.
            (PoolKind::Io, QueueId::All | QueueId::Any) => Ok(QueryScope::Pool(PoolKind::Io)),
            (kind @ (PoolKind::Coro | PoolKind::Io), QueueId::Index(index)) => {
                if index < self.pool_queues(kind).len() {
                    Ok(QueryScope::One(kind, index))
                } else {
                    Err(Error::new(ErrorKind::InvalidArgument).with_context(format!(
                        "queue {index} out of range for {kind} pool of {}",
                        self.pool_queues(kind).len()
                    )))
                }
            }
            (PoolKind::Coro | PoolKind::Io, QueueId::Any | QueueId::Same) => {
                Err(Error::new(ErrorKind::InvalidArgument)
                    .with_context("Any/Same are post-time sentinels, not query selectors"))
            }
        }
    }

    pub(crate) fn query_size(&self, kind: PoolKind, queue: QueueId) -> Result<usize> {
        Ok(match self.resolve_query(kind, queue)? {
            QueryScope::Both => self.total_size(),
            QueryScope::Pool(pool) => self.pool_queues(pool).iter().map(|q| q.size()).sum(),
            QueryScope::One(pool, index) => self.pool_queues(pool)[index].size(),
        })
    }

    pub(crate) fn query_empty(&self, kind: PoolKind, queue: QueueId) -> Result<bool> {
        self.query_size(kind, queue).map(|size| size == 0)
    }

    pub(crate) fn query_stats(&self, kind: PoolKind, queue: QueueId) -> Result<QueueStatistics> {
        let mut total = QueueStatistics::default();
        match self.resolve_query(kind, queue)? {
            QueryScope::Both => {
                for q in self.all_queues() {
                    total.merge(&q.stats());
                }
            }
            QueryScope::Pool(pool) => {
                for q in self.pool_queues(pool) {
                    total.merge(&q.stats());
                }
            }
            QueryScope::One(pool, index) => total = self.pool_queues(pool)[index].stats(),
        }
        Ok(total)
    }

    pub(crate) fn reset_stats(&self) {
        for queue in self.all_queues() {
            queue.counters().reset();
        }
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("id", &self.id)
            .field("coro_threads", &self.coro_threads())
            .field("io_threads", &self.io_threads())
            .field("draining", &self.is_draining())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

enum QueryScope {
    Both,
    Pool(PoolKind),
    One(PoolKind, usize),
}

/// Owner of the worker threads; runs drain and terminate.
pub(crate) struct DispatcherCore {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatcherCore {
    pub(crate) fn new(mut config: DispatcherConfig) -> Self {
        config.normalize();
        let shared = Arc::new(Shared::new(&config));

        // Pin only when every worker can get its own core.
        let core_ids = if config.pin_coro_threads_to_cores
            && config.coro_threads <= available_cores()
        {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut workers = Vec::with_capacity(config.coro_threads + config.io_threads);
        for index in 0..config.coro_threads {
            workers.push(spawn_worker(
                Arc::clone(&shared),
                Arc::clone(shared.coro_queue(index)),
                PoolKind::Coro,
                index,
                core_ids.get(index).copied(),
                &config,
            ));
        }
        for index in 0..config.io_threads {
            workers.push(spawn_worker(
                Arc::clone(&shared),
                Arc::clone(shared.io_queue(index)),
                PoolKind::Io,
                index,
                None,
                &config,
            ));
        }
        debug!(
            dispatcher = shared.id,
            coro_threads = config.coro_threads,
            io_threads = config.io_threads,
            "dispatcher started"
        );
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Blocks until every queue is empty and every worker idle.
    ///
    /// While draining, external posts are rejected; posts from inside an
    /// executing task are still admitted and drained too.
    pub(crate) fn drain(&self) -> Result<()> {
        if self.shared.on_own_worker() {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_context("drain called from within a task would self-deadlock"));
        }
        debug!(dispatcher = self.shared.id, "drain started");
        self.shared.drain_depth.fetch_add(1, Ordering::AcqRel);
        while self.shared.total_size() > 0 && !self.shared.is_terminated() {
            std::thread::sleep(DRAIN_POLL_INTERVAL);
        }
        self.shared.drain_depth.fetch_sub(1, Ordering::AcqRel);
        debug!(dispatcher = self.shared.id, "drain complete");
        Ok(())
    }

    /// Fast shutdown: stop workers, abandon pending work.
    ///
    /// Idempotent; the second and later calls wait for the first to
    /// finish joining and then return.
    pub(crate) fn terminate(&self) {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            // Lost the race: block until the winning call has joined.
            let _workers = self.workers.lock().unwrap();
            return;
        }
        debug!(dispatcher = self.shared.id, "terminate started");
        for queue in self.shared.all_queues() {
            queue.shutdown(false);
        }
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        let mut abandoned = 0usize;
        for queue in self.shared.all_queues() {
            for cell in queue.drain_remaining() {
                abandoned += 1;
                cell.fail(Error::new(ErrorKind::Terminated));
            }
        }
        drop(workers);
        if abandoned > 0 {
            warn!(
                dispatcher = self.shared.id,
                abandoned, "terminate abandoned pending tasks"
            );
        }
        debug!(dispatcher = self.shared.id, "terminate complete");
    }
}

impl std::fmt::Debug for DispatcherCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherCore")
            .field("shared", &self.shared)
            .finish()
    }
}

//! Per-queue scheduling counters and their aggregated snapshots.
//!
//! Counters are updated on enqueue, start, yield, and finish. Snapshots
//! are plain values; aggregation across queues and pools is a field-wise
//! sum via [`QueueStatistics::merge`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Live atomic counters owned by one queue.
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    posted: AtomicU64,
    high_priority_posted: AtomicU64,
    started: AtomicU64,
    resumed: AtomicU64,
    yielded: AtomicU64,
    completed: AtomicU64,
    errors: AtomicU64,
}

impl QueueCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_posted(&self, high_priority: bool) {
        self.posted.fetch_add(1, Ordering::Relaxed);
        if high_priority {
            self.high_priority_posted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn mark_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_resumed(&self) {
        self.resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_yielded(&self) {
        self.yielded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_completed(&self, ok: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn mark_abandoned(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, num_elements: usize) -> QueueStatistics {
        QueueStatistics {
            posted: self.posted.load(Ordering::Relaxed),
            high_priority_posted: self.high_priority_posted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
            yielded: self.yielded.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            num_elements,
        }
    }

    pub(crate) fn reset(&self) {
        self.posted.store(0, Ordering::Relaxed);
        self.high_priority_posted.store(0, Ordering::Relaxed);
        self.started.store(0, Ordering::Relaxed);
        self.resumed.store(0, Ordering::Relaxed);
        self.yielded.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time view of one queue's counters, or a field-wise sum of
/// several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatistics {
    /// Tasks enqueued, both priority classes.
    pub posted: u64,
    /// Tasks enqueued into the high-priority section.
    pub high_priority_posted: u64,
    /// Tasks that received their first poll / run.
    pub started: u64,
    /// Coroutine resumptions after a yield.
    pub resumed: u64,
    /// Coroutine yields.
    pub yielded: u64,
    /// Tasks run to completion, successfully or not.
    pub completed: u64,
    /// Non-zero completions plus tasks abandoned at terminate.
    pub errors: u64,
    /// Resident tasks (including the executing one) at snapshot time.
    pub num_elements: usize,
}

impl QueueStatistics {
    /// Field-wise accumulation, used for pool and dispatcher aggregates.
    pub fn merge(&mut self, other: &QueueStatistics) {
        self.posted += other.posted;
        self.high_priority_posted += other.high_priority_posted;
        self.started += other.started;
        self.resumed += other.resumed;
        self.yielded += other.yielded;
        self.completed += other.completed;
        self.errors += other.errors;
        self.num_elements += other.num_elements;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_land_in_the_snapshot() {
        let counters = QueueCounters::new();
        counters.mark_posted(false);
        counters.mark_posted(true);
        counters.mark_started();
        counters.mark_yielded();
        counters.mark_resumed();
        counters.mark_completed(true);
        counters.mark_completed(false);

        let stats = counters.snapshot(3);
        assert_eq!(stats.posted, 2);
        assert_eq!(stats.high_priority_posted, 1);
        assert_eq!(stats.started, 1);
        assert_eq!(stats.yielded, 1);
        assert_eq!(stats.resumed, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.num_elements, 3);
    }

    #[test]
    fn merge_is_field_wise() {
        let a = QueueStatistics {
            posted: 1,
            high_priority_posted: 1,
            started: 2,
            resumed: 0,
            yielded: 3,
            completed: 1,
            errors: 0,
            num_elements: 4,
        };
        let mut b = QueueStatistics::default();
        b.merge(&a);
        b.merge(&a);
        assert_eq!(b.posted, 2);
        assert_eq!(b.yielded, 6);
        assert_eq!(b.num_elements, 8);
    }

    #[test]
    fn reset_zeroes_everything() {
        let counters = QueueCounters::new();
        counters.mark_posted(true);
        counters.mark_abandoned();
        counters.reset();
        assert_eq!(counters.snapshot(0), QueueStatistics::default());
    }
}

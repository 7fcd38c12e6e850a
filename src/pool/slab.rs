//! Fixed-capacity slab pool with heap fallback.
//!
//! [`SlabPool`] hands out owning [`Pooled`] handles backed by a
//! preallocated slab of cells. When the slab is exhausted, allocation
//! falls back to the heap and a counter tracks the overflow. Dropping a
//! handle (or calling [`Pooled::into_inner`]) returns the slab index to
//! the free stack, or frees the heap block and decrements the counter.
//!
//! # Design
//!
//! - The free-index stack is guarded by a `parking_lot::Mutex`: critical
//!   sections are a push or pop of one index, so the adaptive spin path
//!   is the common case.
//! - Free indices are stored as `u32`; a slab never exceeds `u32::MAX`
//!   cells.
//! - An optional heap limit bounds the fallback; past it, allocation
//!   signals [`ErrorKind::ResourceExhausted`](crate::ErrorKind::ResourceExhausted).
//!   Without a limit, allocation cannot fail.
//!
//! The pool is shared by cloning; all clones draw from the same slab.

use crate::error::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A thread-safe fixed-capacity slab pool with heap fallback.
pub struct SlabPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for SlabPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct PoolShared<T> {
    slots: Mutex<Slots<T>>,
    /// Number of live heap-fallback blocks.
    heap_blocks: AtomicUsize,
    heap_limit: Option<usize>,
    capacity: usize,
}

struct Slots<T> {
    cells: Vec<Option<T>>,
    /// Stack of free cell indices. Starts holding every index.
    free: Vec<u32>,
}

impl<T> SlabPool<T> {
    /// Creates a pool with `capacity` slab cells and unbounded heap
    /// fallback.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `u32::MAX`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_heap_limit(capacity, None)
    }

    /// Creates a pool with `capacity` slab cells and at most `heap_limit`
    /// concurrent heap-fallback blocks.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `u32::MAX`.
    #[must_use]
    pub fn with_heap_limit(capacity: usize, heap_limit: Option<usize>) -> Self {
        assert!(
            u32::try_from(capacity).is_ok(),
            "slab capacity exceeds u32 index range"
        );
        let mut cells = Vec::with_capacity(capacity);
        cells.resize_with(capacity, || None);
        // Popping from the stack tail yields low indices first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            shared: Arc::new(PoolShared {
                slots: Mutex::new(Slots { cells, free }),
                heap_blocks: AtomicUsize::new(0),
                heap_limit,
                capacity,
            }),
        }
    }

    /// Places `value` in the pool, preferring a slab cell over the heap.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ResourceExhausted`] when the slab is full and
    /// the configured heap limit has been reached.
    pub fn try_create(&self, value: T) -> Result<Pooled<T>> {
        let value = match self.try_slab(value) {
            Ok(pooled) => return Ok(pooled),
            Err(value) => value,
        };
        if let Some(limit) = self.shared.heap_limit {
            if self.shared.heap_blocks.load(Ordering::Acquire) >= limit {
                return Err(Error::new(ErrorKind::ResourceExhausted)
                    .with_context("slab full and heap limit reached"));
            }
        }
        Ok(self.heap_fallback(value))
    }

    /// Places `value` in the pool, ignoring any heap limit.
    ///
    /// Used for re-admissions of values that already passed `try_create`
    /// once, where failure is not an option.
    #[must_use]
    pub fn create(&self, value: T) -> Pooled<T> {
        match self.try_slab(value) {
            Ok(pooled) => pooled,
            Err(value) => self.heap_fallback(value),
        }
    }

    fn try_slab(&self, value: T) -> std::result::Result<Pooled<T>, T> {
        let mut slots = self.shared.slots.lock();
        if let Some(index) = slots.free.pop() {
            debug_assert!(slots.cells[index as usize].is_none());
            slots.cells[index as usize] = Some(value);
            Ok(Pooled {
                shared: Arc::clone(&self.shared),
                slot: Some(PooledSlot::Slab(index)),
            })
        } else {
            Err(value)
        }
    }

    fn heap_fallback(&self, value: T) -> Pooled<T> {
        self.shared.heap_blocks.fetch_add(1, Ordering::AcqRel);
        Pooled {
            shared: Arc::clone(&self.shared),
            slot: Some(PooledSlot::Heap(Box::new(value))),
        }
    }

    /// Returns the slab capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns the total number of live blocks, slab and heap combined.
    #[must_use]
    pub fn allocated_blocks(&self) -> usize {
        let slab_in_use = {
            let slots = self.shared.slots.lock();
            self.shared.capacity - slots.free.len()
        };
        slab_in_use + self.allocated_heap_blocks()
    }

    /// Returns the number of live heap-fallback blocks.
    #[must_use]
    pub fn allocated_heap_blocks(&self) -> usize {
        self.shared.heap_blocks.load(Ordering::Acquire)
    }

    /// Returns true if every slab cell is in use.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.shared.slots.lock().free.is_empty()
    }

    /// Returns true if no block is live, slab or heap.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.slots.lock().free.len() == self.shared.capacity
            && self.allocated_heap_blocks() == 0
    }
}

impl<T> std::fmt::Debug for SlabPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabPool")
            .field("capacity", &self.shared.capacity)
            .field("allocated_blocks", &self.allocated_blocks())
            .field("allocated_heap_blocks", &self.allocated_heap_blocks())
            .finish()
    }
}

enum PooledSlot<T> {
    Slab(u32),
    Heap(Box<T>),
}

/// An owning handle to a value placed in a [`SlabPool`].
///
/// Dropping the handle releases the underlying block back to the pool.
pub struct Pooled<T> {
    shared: Arc<PoolShared<T>>,
    /// `None` only transiently, after `into_inner` disarmed the drop.
    slot: Option<PooledSlot<T>>,
}

impl<T> Pooled<T> {
    /// Takes the value out, releasing the block back to the pool.
    #[must_use]
    pub fn into_inner(mut self) -> T {
        match self.slot.take().expect("pooled slot already taken") {
            PooledSlot::Slab(index) => {
                let mut slots = self.shared.slots.lock();
                let value = slots.cells[index as usize]
                    .take()
                    .expect("pooled slab cell vacated twice");
                slots.free.push(index);
                value
            }
            PooledSlot::Heap(boxed) => {
                self.shared.heap_blocks.fetch_sub(1, Ordering::AcqRel);
                *boxed
            }
        }
    }

    /// Returns true if this handle is backed by a slab cell rather than
    /// the heap fallback.
    #[must_use]
    pub fn is_slab_backed(&self) -> bool {
        matches!(self.slot, Some(PooledSlot::Slab(_)))
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        match self.slot.take() {
            Some(PooledSlot::Slab(index)) => {
                let mut slots = self.shared.slots.lock();
                slots.cells[index as usize] = None;
                slots.free.push(index);
            }
            Some(PooledSlot::Heap(boxed)) => {
                self.shared.heap_blocks.fetch_sub(1, Ordering::AcqRel);
                drop(boxed);
            }
            None => {}
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("slab_backed", &self.is_slab_backed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let pool: SlabPool<u64> = SlabPool::new(4);
        assert!(pool.is_empty());
        assert!(!pool.is_full());
        assert_eq!(pool.allocated_blocks(), 0);
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn slab_fills_before_heap() {
        let pool: SlabPool<u64> = SlabPool::new(2);
        let a = pool.try_create(1).unwrap();
        let b = pool.try_create(2).unwrap();
        assert!(a.is_slab_backed());
        assert!(b.is_slab_backed());
        assert!(pool.is_full());
        assert_eq!(pool.allocated_heap_blocks(), 0);

        let c = pool.try_create(3).unwrap();
        assert!(!c.is_slab_backed());
        assert_eq!(pool.allocated_heap_blocks(), 1);
        assert_eq!(pool.allocated_blocks(), 3);
    }

    #[test]
    fn release_returns_blocks() {
        let pool: SlabPool<String> = SlabPool::new(2);
        let a = pool.try_create("a".into()).unwrap();
        let b = pool.try_create("b".into()).unwrap();
        let c = pool.try_create("c".into()).unwrap();

        assert_eq!(a.into_inner(), "a");
        assert_eq!(pool.allocated_blocks(), 2);
        drop(b);
        assert_eq!(c.into_inner(), "c");
        assert!(pool.is_empty());
        assert_eq!(pool.allocated_heap_blocks(), 0);
    }

    #[test]
    fn freed_slab_cells_are_reused() {
        let pool: SlabPool<u32> = SlabPool::new(1);
        for round in 0..100 {
            let cell = pool.try_create(round).unwrap();
            assert!(cell.is_slab_backed());
            assert_eq!(cell.into_inner(), round);
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn heap_limit_signals_exhaustion() {
        let pool: SlabPool<u8> = SlabPool::with_heap_limit(1, Some(1));
        let _a = pool.try_create(0).unwrap();
        let _b = pool.try_create(1).unwrap();
        let err = pool.try_create(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn interleaved_alloc_free_is_a_permutation() {
        let pool: SlabPool<usize> = SlabPool::new(8);
        let mut held = Vec::new();
        for i in 0..8 {
            held.push(pool.try_create(i).unwrap());
        }
        assert!(pool.is_full());
        // Free half, re-create, and confirm the slab absorbs them all.
        drop(held.split_off(4));
        assert_eq!(pool.allocated_blocks(), 4);
        for i in 0..4 {
            held.push(pool.try_create(100 + i).unwrap());
        }
        assert!(pool.is_full());
        assert_eq!(pool.allocated_heap_blocks(), 0);
        drop(held);
        assert!(pool.is_empty());
    }

    #[test]
    fn shared_clones_draw_from_one_slab() {
        let pool: SlabPool<u8> = SlabPool::new(2);
        let clone = pool.clone();
        let _a = pool.try_create(1).unwrap();
        let _b = clone.try_create(2).unwrap();
        assert!(pool.is_full());
        assert!(clone.is_full());
    }
}

//! Fixed-capacity pools of pre-sized packet buffers.
//!
//! A pool is an arena of slots addressed by `(size class, index)`. The
//! capacity is one budget shared by every size class: at most `capacity`
//! slots are checked out at once, and at most `capacity` buffers are held in
//! memory. Each class keeps a mutex-guarded free list; the buffer memory moves
//! out of the arena into the [`Slot`] on acquire and back on release, so a
//! slot is always owned by exactly one party.
//!
//! `acquire` never blocks and never grows the pool. When the budget is spent
//! it returns [`PoolError::Exhausted`] and the caller picks the fallback
//! (drop, heap copy, wait).

mod slot;

pub use slot::Slot;

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::PoolError;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// How slot sizes are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizePolicy {
    /// Every slot has the same size.
    Fixed(usize),
    /// One size class per entry; a request goes to the smallest class that fits.
    Buckets(Vec<usize>),
}

impl SizePolicy {
    fn class_sizes(&self) -> Vec<usize> {
        let mut sizes = match self {
            SizePolicy::Fixed(size) => vec![*size],
            SizePolicy::Buckets(sizes) => sizes.clone(),
        };
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub outstanding: usize,
    /// Buffers currently allocated, checked out or parked.
    pub materialized: usize,
}

/// A shareable handle to a buffer pool.
///
/// Cloning is cheap and every clone refers to the same arena. Acquire and
/// release are safe to call from the capture thread and worker threads at the
/// same time.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    id: u64,
    capacity: usize,
    classes: Box<[SizeClass]>,
    outstanding: AtomicUsize,
    materialized: AtomicUsize,
    closed: AtomicBool,
}

struct SizeClass {
    size: usize,
    state: Mutex<ClassState>,
}

/// Every class has `capacity` indices, so the class a request maps to always
/// has a free index once the shared budget admits it.
struct ClassState {
    /// Free indices whose buffer is parked in `buffers`.
    parked: Vec<u32>,
    /// Free indices with no memory behind them.
    vacant: Vec<u32>,
    buffers: Vec<Option<Box<[u8]>>>,
    in_use: Vec<bool>,
}

impl BufferPool {
    /// Create a pool of `capacity` slots shared by all size classes.
    ///
    /// With `preallocate` the `capacity` buffers are allocated now, split
    /// evenly across the classes; otherwise each buffer is allocated on first
    /// use. A class that needs a new buffer while the whole budget is
    /// allocated frees a parked buffer of another class.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, exceeds `u32::MAX`, or a slot size is zero.
    pub fn new(capacity: usize, policy: SizePolicy, preallocate: bool) -> Self {
        assert!(capacity > 0, "pool capacity must be non-zero");
        assert!(capacity <= u32::MAX as usize, "pool capacity too large");
        let sizes = policy.class_sizes();
        assert!(
            !sizes.is_empty() && sizes[0] > 0,
            "pool slot sizes must be non-zero"
        );

        let k = sizes.len();
        let classes: Box<[SizeClass]> = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let share = match preallocate {
                    true => capacity / k + usize::from(i < capacity % k),
                    false => 0,
                };
                SizeClass::new(size, capacity, share)
            })
            .collect();

        let shared = Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            classes,
            outstanding: AtomicUsize::new(0),
            materialized: AtomicUsize::new(if preallocate { capacity } else { 0 }),
            closed: AtomicBool::new(false),
        };

        tracing::info!(
            pool = shared.id,
            capacity,
            classes = ?sizes,
            preallocate,
            "buffer pool created"
        );

        BufferPool {
            shared: Arc::new(shared),
        }
    }

    /// Shorthand for a single fixed-size class.
    pub fn fixed(capacity: usize, slot_size: usize, preallocate: bool) -> Self {
        Self::new(capacity, SizePolicy::Fixed(slot_size), preallocate)
    }

    /// Take a slot of at least `min_size` bytes from the smallest class that
    /// fits.
    ///
    /// Never blocks; returns [`PoolError::Exhausted`] when `capacity` slots
    /// are already out or no class is large enough.
    pub fn acquire(&self, min_size: usize) -> Result<Slot, PoolError> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let exhausted = || {
            tracing::trace!(pool = shared.id, requested = min_size, "pool exhausted");
            PoolError::Exhausted {
                requested: min_size,
            }
        };

        let Some(class_idx) = shared.classes.iter().position(|c| c.size >= min_size) else {
            return Err(exhausted());
        };
        if !shared.reserve() {
            return Err(exhausted());
        }

        let class = &shared.classes[class_idx];
        let mut guard = class.state.lock();
        // Re-check under the lock: close() flips the flag while holding every class lock.
        if shared.closed.load(Ordering::Acquire) {
            drop(guard);
            shared.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(PoolError::Closed);
        }
        let state = &mut *guard;
        let Some(index) = state.parked.pop().or_else(|| state.vacant.pop()) else {
            drop(guard);
            shared.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(exhausted());
        };
        let slot_idx = index as usize;
        let (buf, fresh) = match state.buffers[slot_idx].take() {
            Some(buf) => (buf, false),
            None => (vec![0u8; class.size].into_boxed_slice(), true),
        };
        state.in_use[slot_idx] = true;
        drop(guard);

        if fresh && shared.materialized.fetch_add(1, Ordering::AcqRel) >= shared.capacity {
            shared.evict_parked(class_idx);
        }

        Ok(Slot::new(buf, class_idx as u16, index, self.shared.clone()))
    }

    /// Return a slot to its size class.
    ///
    /// Dropping a [`Slot`] releases it as well; this form reports misuse
    /// instead of only logging it.
    pub fn release(&self, mut slot: Slot) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&slot.pool, &self.shared) {
            // The slot still goes home through its own drop.
            return Err(PoolError::ForeignSlot);
        }
        match slot.take_buffer() {
            Some(buf) => self.shared.put_back(slot.class, slot.index, buf),
            None => Err(PoolError::DoubleRelease {
                index: slot.index as usize,
            }),
        }
    }

    /// Free slots, counting slots that have not been materialized yet.
    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.outstanding())
    }

    /// Slots currently checked out.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Total slot budget, shared by all size classes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Slot sizes, smallest first.
    pub fn class_sizes(&self) -> Vec<usize> {
        self.shared.classes.iter().map(|c| c.size).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let outstanding = self.outstanding();
        PoolStats {
            capacity: self.capacity(),
            available: self.capacity().saturating_sub(outstanding),
            outstanding,
            materialized: self.shared.materialized.load(Ordering::Acquire),
        }
    }

    /// Release all backing memory.
    ///
    /// Fails with [`PoolError::Outstanding`] and leaves the pool usable if any
    /// slot is still checked out.
    pub fn close(&self) -> Result<(), PoolError> {
        let shared = &self.shared;
        // Lock classes in index order; acquire/put_back/evict take at most one at a time.
        let mut guards: Vec<MutexGuard<'_, ClassState>> =
            shared.classes.iter().map(|c| c.state.lock()).collect();

        if shared.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let count = shared.outstanding.load(Ordering::Acquire);
        if count > 0 {
            tracing::warn!(pool = shared.id, outstanding = count, "refusing to close pool with outstanding slots");
            return Err(PoolError::Outstanding { count });
        }

        shared.closed.store(true, Ordering::Release);
        for state in guards.iter_mut() {
            state.buffers.iter_mut().for_each(|b| *b = None);
            state.parked.clear();
            state.vacant.clear();
        }
        shared.materialized.store(0, Ordering::Release);
        drop(guards);

        tracing::info!(pool = shared.id, "buffer pool closed");
        Ok(())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.shared.id)
            .field("classes", &self.class_sizes())
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

impl SizeClass {
    fn new(size: usize, capacity: usize, preallocated: usize) -> Self {
        // Both lists reserve the full index range so pushes never allocate.
        // Reversed so that index 0 is handed out first.
        let mut parked = Vec::with_capacity(capacity);
        parked.extend((0..preallocated as u32).rev());
        let mut vacant = Vec::with_capacity(capacity);
        vacant.extend((preallocated as u32..capacity as u32).rev());
        let buffers = (0..capacity)
            .map(|i| (i < preallocated).then(|| vec![0u8; size].into_boxed_slice()))
            .collect();
        SizeClass {
            size,
            state: Mutex::new(ClassState {
                parked,
                vacant,
                buffers,
                in_use: vec![false; capacity],
            }),
        }
    }
}

impl Shared {
    /// Count one more slot as outstanding unless the budget is spent.
    fn reserve(&self) -> bool {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Free one parked buffer from a class other than `except`, keeping the
    /// materialized count within the budget.
    fn evict_parked(&self, except: usize) {
        for (idx, class) in self.classes.iter().enumerate() {
            if idx == except {
                continue;
            }
            let mut guard = class.state.lock();
            let state = &mut *guard;
            if let Some(index) = state.parked.pop() {
                state.buffers[index as usize] = None;
                state.vacant.push(index);
                self.materialized.fetch_sub(1, Ordering::AcqRel);
                tracing::trace!(pool = self.id, class = class.size, "evicted parked buffer");
                return;
            }
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn put_back(&self, class: u16, index: u32, buf: Box<[u8]>) -> Result<(), PoolError> {
        let Some(size_class) = self.classes.get(class as usize) else {
            return Err(PoolError::ForeignSlot);
        };
        let slot_idx = index as usize;
        let mut state = size_class.state.lock();
        if slot_idx >= state.in_use.len() || buf.len() != size_class.size {
            return Err(PoolError::ForeignSlot);
        }
        if !state.in_use[slot_idx] {
            return Err(PoolError::DoubleRelease { index: slot_idx });
        }
        state.in_use[slot_idx] = false;
        state.buffers[slot_idx] = Some(buf);
        state.parked.push(index);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exhausts_after_capacity() {
        let pool = BufferPool::fixed(4, 128, true);
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire(64).unwrap());
        }
        assert_eq!(
            pool.acquire(64).unwrap_err(),
            PoolError::Exhausted { requested: 64 }
        );
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.outstanding(), 4);

        for slot in held {
            pool.release(slot).unwrap();
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn buckets_pick_smallest_fit() {
        let pool = BufferPool::new(3, SizePolicy::Buckets(vec![2048, 256, 9000]), false);
        assert_eq!(pool.class_sizes(), vec![256, 2048, 9000]);

        let small = pool.acquire(100).unwrap();
        assert_eq!(small.capacity(), 256);
        let mid = pool.acquire(256 + 1).unwrap();
        assert_eq!(mid.capacity(), 2048);
        assert!(matches!(
            pool.acquire(10_000),
            Err(PoolError::Exhausted { requested: 10_000 })
        ));
        let jumbo = pool.acquire(3000).unwrap();
        assert_eq!(jumbo.capacity(), 9000);

        drop((small, mid, jumbo));
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn capacity_is_one_budget_across_classes() {
        let pool = BufferPool::new(3, SizePolicy::Buckets(vec![256, 1536]), false);
        assert_eq!(pool.capacity(), 3);
        let held: Vec<_> = (0..3).map(|_| pool.acquire(100).unwrap()).collect();
        assert!(held.iter().all(|s| s.capacity() == 256));
        assert_eq!(
            pool.acquire(100).unwrap_err(),
            PoolError::Exhausted { requested: 100 }
        );
        // The larger class draws on the same budget.
        assert!(matches!(pool.acquire(1000), Err(PoolError::Exhausted { .. })));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn materialized_memory_stays_within_budget() {
        let pool = BufferPool::new(2, SizePolicy::Buckets(vec![64, 1024]), false);
        drop((pool.acquire(10).unwrap(), pool.acquire(10).unwrap()));
        assert_eq!(pool.stats().materialized, 2);

        let large = (pool.acquire(500).unwrap(), pool.acquire(500).unwrap());
        assert_eq!(large.0.capacity(), 1024);
        // Both parked small buffers were freed to make room.
        assert_eq!(pool.stats().materialized, 2);
        drop(large);
        assert_eq!(pool.stats().materialized, 2);
    }

    #[test]
    fn preallocation_splits_budget_across_classes() {
        let pool = BufferPool::new(5, SizePolicy::Buckets(vec![64, 256]), true);
        assert_eq!(pool.stats().materialized, 5);
        let held: Vec<_> = (0..5).map(|_| pool.acquire(200).unwrap()).collect();
        assert!(held.iter().all(|s| s.capacity() == 256));
        assert_eq!(pool.stats().materialized, 5);
    }

    #[test]
    fn lazy_pool_materializes_on_demand() {
        let pool = BufferPool::fixed(8, 512, false);
        assert_eq!(pool.stats().materialized, 0);
        let a = pool.acquire(10).unwrap();
        let b = pool.acquire(10).unwrap();
        assert_eq!(pool.stats().materialized, 2);
        drop(a);
        // Reuses the parked buffer rather than allocating a third.
        let _c = pool.acquire(10).unwrap();
        drop(b);
        assert_eq!(pool.stats().materialized, 2);
    }

    #[test]
    fn release_into_wrong_pool_is_rejected() {
        let a = BufferPool::fixed(2, 64, true);
        let b = BufferPool::fixed(2, 64, true);
        let slot = a.acquire(1).unwrap();
        assert_eq!(b.release(slot), Err(PoolError::ForeignSlot));
        // The rejected slot found its way home on drop.
        assert_eq!(a.available(), 2);
        assert_eq!(b.available(), 2);
    }

    #[test]
    fn double_put_back_is_detected() {
        let pool = BufferPool::fixed(1, 64, true);
        let mut slot = pool.acquire(1).unwrap();
        let (class, index) = (slot.class, slot.index);
        let buf = slot.take_buffer().unwrap();
        pool.shared.put_back(class, index, buf).unwrap();
        let again = vec![0u8; 64].into_boxed_slice();
        assert_eq!(
            pool.shared.put_back(class, index, again),
            Err(PoolError::DoubleRelease { index: 0 })
        );
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn close_refuses_while_slots_are_out() {
        let pool = BufferPool::fixed(3, 64, true);
        let slot = pool.acquire(1).unwrap();
        assert_eq!(pool.close(), Err(PoolError::Outstanding { count: 1 }));
        assert!(!pool.is_closed());

        drop(slot);
        pool.close().unwrap();
        assert!(pool.is_closed());
        assert_eq!(pool.acquire(1).unwrap_err(), PoolError::Closed);
        assert_eq!(pool.close(), Err(PoolError::Closed));
    }

    #[test]
    fn concurrent_acquire_release_keeps_accounting() {
        let pool = BufferPool::fixed(16, 256, true);
        std::thread::scope(|s| {
            for _ in 0..4 {
                let pool = pool.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        if let Ok(slot) = pool.acquire(100) {
                            assert!(pool.available() + pool.outstanding() <= 16);
                            pool.release(slot).unwrap();
                        }
                    }
                });
            }
        });
        assert_eq!(pool.available(), 16);
        assert_eq!(pool.outstanding(), 0);
    }

    proptest! {
        #[test]
        fn available_plus_outstanding_is_capacity(
            capacity in 1usize..32,
            ops in proptest::collection::vec((any::<bool>(), 1usize..300), 0..200),
        ) {
            let pool = BufferPool::new(capacity, SizePolicy::Buckets(vec![64, 256]), false);
            let total = pool.capacity();
            prop_assert_eq!(total, capacity);
            let mut held = Vec::new();
            for (acquire, size) in ops {
                if acquire {
                    if let Ok(slot) = pool.acquire(size) {
                        held.push(slot);
                    }
                } else if let Some(slot) = held.pop() {
                    pool.release(slot).unwrap();
                }
                prop_assert_eq!(pool.available() + pool.outstanding(), total);
                prop_assert_eq!(pool.outstanding(), held.len());
                prop_assert!(pool.stats().materialized <= capacity);
            }
        }
    }
}

//! Fixed slot storage and ring cursors shared by the lock-free queues.
//!
//! A ring is a boxed slice of [`Slot`]s allocated once at construction. Each
//! slot pairs an uninitialized payload cell with a piece of ownership metadata
//! (`S`): a ready flag for SPSC, a version counter for MPMC. The metadata is
//! the only thing that decides which thread may touch the payload.
//!
//! Logical positions come from two monotonically increasing cursors and map
//! to slots by `position % capacity`. The tail cursor also carries the closed
//! mark, so reserving a position and observing a close are a single atomic
//! step.
//!
//! # Safety
//!
//! The payload accessors are `unsafe`: callers must hold the slot's write or
//! read token as defined by the owning queue's protocol.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Closed mark kept in the top bit of the tail cursor.
const CLOSED: usize = 1 << (usize::BITS - 1);

/// Seal value while the queue is open: no position compares above it.
const UNSEALED: usize = usize::MAX;

/// Interior-mutable payload cell.
///
/// Holds at most one `T`; whether it is initialized is tracked by the slot's
/// metadata, not by the cell.
#[repr(transparent)]
pub(crate) struct SlotCell<T>(UnsafeCell<MaybeUninit<T>>);

impl<T> SlotCell<T> {
    pub(crate) const fn new() -> Self {
        Self(UnsafeCell::new(MaybeUninit::uninit()))
    }

    /// Moves `value` into the cell.
    ///
    /// # Safety
    ///
    /// The caller holds the slot's write token and the cell is empty.
    #[inline]
    pub(crate) unsafe fn write(&self, value: T) {
        // SAFETY: the write token gives this thread exclusive access.
        unsafe { (*self.0.get()).write(value) };
    }

    /// Moves the value out, leaving the cell logically empty.
    ///
    /// # Safety
    ///
    /// The caller holds the slot's read token and the cell was written.
    #[inline]
    pub(crate) unsafe fn take(&self) -> T {
        // SAFETY: the read token gives exclusive access; the producer's
        // release store made the initialized value visible.
        unsafe { (*self.0.get()).assume_init_read() }
    }

    /// Drops the value in place.
    ///
    /// # Safety
    ///
    /// The cell was written and not taken.
    pub(crate) unsafe fn drop_value(&mut self) {
        // SAFETY: exclusive via `&mut`; initialized per caller contract.
        unsafe { self.0.get_mut().assume_init_drop() };
    }
}

/// One storage cell: payload plus ownership metadata.
#[repr(C)]
#[repr(align(64))] // Each slot on its own cache line to avoid false sharing between neighbours
pub(crate) struct Slot<T, S> {
    pub(crate) state: S,
    pub(crate) value: SlotCell<T>,
}

// SAFETY: the payload is only touched by the thread holding the slot's token
// (see the owning queue); `state` is itself Sync.
unsafe impl<T: Send, S: Sync> Sync for Slot<T, S> {}

/// Fixed-capacity array of slots, indexed by logical position.
pub(crate) struct Slots<T, S> {
    slots: Box<[Slot<T, S>]>,
}

impl<T, S> Slots<T, S> {
    /// Allocates `capacity` slots, building slot `i`'s metadata with `init(i)`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub(crate) fn new(capacity: usize, mut init: impl FnMut(usize) -> S) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");
        let slots = (0..capacity)
            .map(|i| Slot {
                state: init(i),
                value: SlotCell::new(),
            })
            .collect();
        Self { slots }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot owning logical position `pos`.
    #[inline]
    pub(crate) fn at(&self, pos: usize) -> &Slot<T, S> {
        &self.slots[pos % self.slots.len()]
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot<T, S>> {
        self.slots.iter_mut()
    }
}

/// Version meaning "free to be written as position `pos`".
///
/// Versions advance two per logical position: free for `k` is `2k`, written
/// for `k` is `2k + 1`, and a read republishes free for `k + capacity`. With a
/// single slot, "written for `k`" and "free for `k + 1`" stay distinct.
#[inline]
pub(crate) const fn free_for(pos: usize) -> usize {
    pos.wrapping_mul(2)
}

/// Version meaning "holds the value pushed at position `pos`".
#[inline]
pub(crate) const fn written_for(pos: usize) -> usize {
    free_for(pos) | 1
}

/// Whether a slot with this version holds a value.
#[inline]
pub(crate) const fn holds_value(version: usize) -> bool {
    version & 1 == 1
}

/// Consumer-side cursor: next logical position to pop.
pub(crate) struct HeadCursor(CachePadded<AtomicUsize>);

impl HeadCursor {
    pub(crate) fn new() -> Self {
        Self(CachePadded::new(AtomicUsize::new(0)))
    }

    /// Claims the next position unconditionally.
    #[inline]
    pub(crate) fn reserve(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn load(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Claims `pos` if no other consumer moved the cursor since it was read.
    #[inline]
    pub(crate) fn try_advance(&self, pos: usize) -> bool {
        self.0
            .compare_exchange(pos, pos.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

/// Producer-side cursor: next logical position to push, plus the closed mark.
///
/// Closing sets the mark and records the *seal*: the tail position at the
/// moment of closing. Every position below the seal was reserved by a push
/// that will complete; no position at or above it will ever be written.
pub(crate) struct TailCursor {
    pos: CachePadded<AtomicUsize>,
    seal: AtomicUsize,
}

impl TailCursor {
    pub(crate) fn new() -> Self {
        Self {
            pos: CachePadded::new(AtomicUsize::new(0)),
            seal: AtomicUsize::new(UNSEALED),
        }
    }

    /// Next position to push, or `None` once closed.
    #[inline]
    pub(crate) fn open_position(&self) -> Option<usize> {
        let raw = self.pos.load(Ordering::Relaxed);
        if raw & CLOSED == 0 { Some(raw) } else { None }
    }

    /// Claims `pos` for a push.
    ///
    /// Fails if another producer took it or the queue closed since
    /// [`open_position`](Self::open_position) returned it.
    #[inline]
    pub(crate) fn try_advance(&self, pos: usize) -> bool {
        self.pos
            .compare_exchange(pos, pos.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Tail position with the closed mark stripped.
    #[inline]
    pub(crate) fn load(&self) -> usize {
        self.pos.load(Ordering::Relaxed) & !CLOSED
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.pos.load(Ordering::Acquire) & CLOSED != 0
    }

    /// Sets the closed mark. Returns `true` for the call that closed the queue.
    pub(crate) fn close(&self) -> bool {
        let prev = self.pos.fetch_or(CLOSED, Ordering::AcqRel);
        if prev & CLOSED != 0 {
            return false;
        }
        self.seal.store(prev, Ordering::Release);
        true
    }

    /// Whether `pos` can never be filled: the queue is closed and no push
    /// reserved `pos` before the close.
    #[inline]
    pub(crate) fn is_sealed(&self, pos: usize) -> bool {
        pos >= self.seal.load(Ordering::Acquire)
    }
}

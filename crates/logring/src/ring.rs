use crate::invariants::{
    debug_assert_bounded_count, debug_assert_head_not_past_tail, debug_assert_monotonic,
};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Classic SPSC protocol over unbounded u64 sequence numbers (no ABA: at ten
// billion enqueues per second, wrap takes ~58 years). The slot index is
// `sequence & mask`, computed only on access.
//
// Producer: load `tail` Relaxed (sole writer), check `cached_head`, refresh
// it with an Acquire load of `head` only when the cache says full, write the
// slot, store `tail` Release (publishes the slot contents).
//
// Consumer: load `head` Relaxed (sole writer), check `cached_tail`, refresh
// it with an Acquire load of `tail` only when the cache says empty, read the
// slot, store `head` Release (returns the slot to the producer).
//
// A successful dequeue is therefore a happens-before point for the item's
// contents. The cached counterpart indices live in `UnsafeCell`s with exactly
// one writer each; multi-producer or multi-consumer use requires an external
// serializer (the dispatcher provides one for each side), whose lock
// acquisition supplies the missing happens-before edge for the caches.
// =============================================================================

/// Creation errors for [`Ring`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Capacity must be a power of two and at least 2.
    #[error("invalid ring capacity {0} (must be a power of two >= 2)")]
    InvalidCapacity(usize),
}

/// Bounded lock-free SPSC ring buffer of owned items.
///
/// The hard guarantee is single-producer / single-consumer. Producer and
/// consumer indices live on distinct cache lines ([`CachePadded`]) so the two
/// sides never false-share. Full and empty are normal outcomes, not errors.
pub struct Ring<T> {
    // === PRODUCER HOT ===
    /// Tail sequence (written by producer, read by consumer).
    tail: CachePadded<AtomicU64>,
    /// Producer's cached view of head (avoids cross-core reads).
    cached_head: CachePadded<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Head sequence (written by consumer, read by producer).
    head: CachePadded<AtomicU64>,
    /// Consumer's cached view of tail (avoids cross-core reads).
    cached_tail: CachePadded<UnsafeCell<u64>>,

    // === CONFIG ===
    mask: usize,

    // === DATA ===
    /// Fixed-size slot storage. `Box<[T]>` rather than `Vec<T>`: the size
    /// never changes after construction.
    buffer: UnsafeCell<Box<[MaybeUninit<T>]>>,
}

// Safety: the sequence-number protocol above synchronizes all slot accesses;
// items only move between threads, so `T: Send` suffices.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("mask", &self.mask)
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("head", &self.head.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Ring<T> {
    /// Creates a ring with the given capacity.
    ///
    /// Capacity must be a power of two and at least 2.
    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(RingError::InvalidCapacity(capacity));
        }

        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, MaybeUninit::uninit);

        Ok(Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            mask: capacity - 1,
            buffer: UnsafeCell::new(buffer.into_boxed_slice()),
        })
    }

    /// Returns the ring capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate occupancy.
    ///
    /// Converges monotonically; may momentarily disagree with concurrent
    /// enqueue/dequeue.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// Returns true if the ring is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Publishes one item, or hands it back if the ring is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);

        // Fast path: trust the cached head.
        // SAFETY: cached_head has a single writer (the producer side).
        let mut head = unsafe { *self.cached_head.get() };
        if tail.wrapping_sub(head) as usize >= self.capacity() {
            // Slow path: refresh the cache from the consumer's published head.
            head = self.head.load(Ordering::Acquire);
            // SAFETY: single writer, see above.
            unsafe { *self.cached_head.get() = head };
            if tail.wrapping_sub(head) as usize >= self.capacity() {
                return Err(item);
            }
        }

        let idx = (tail as usize) & self.mask;
        // SAFETY: the slot at `idx` is outside [head, tail), so the consumer
        // does not touch it until the Release store below publishes it.
        unsafe {
            let buffer = &mut *self.buffer.get();
            buffer[idx].write(item);
        }

        let new_tail = tail.wrapping_add(1);
        debug_assert_bounded_count!(new_tail.wrapping_sub(head) as usize, self.capacity());
        debug_assert_monotonic!("tail", tail, new_tail);
        self.tail.store(new_tail, Ordering::Release);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Removes and returns one item, or `None` if the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.refreshed_tail(head)?;

        let idx = (head as usize) & self.mask;
        // SAFETY: the slot at `idx` is inside [head, tail): fully written by
        // the producer and published by its Release store, which the Acquire
        // load in `refreshed_tail` synchronized with.
        let item = unsafe {
            let buffer = &*self.buffer.get();
            buffer[idx].assume_init_read()
        };

        let new_head = head.wrapping_add(1);
        debug_assert_head_not_past_tail!(new_head, tail);
        debug_assert_monotonic!("head", head, new_head);
        self.head.store(new_head, Ordering::Release);
        Some(item)
    }

    /// Borrows the item at the head without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.peek_at(0)
    }

    /// Borrows the item `offset` positions past the head without consuming.
    ///
    /// Consumer-side; the borrow is valid until the consumer advances.
    pub fn peek_at(&self, offset: usize) -> Option<&T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.refreshed_tail(head)?;

        if offset >= tail.wrapping_sub(head) as usize {
            return None;
        }

        let idx = (head.wrapping_add(offset as u64) as usize) & self.mask;
        // SAFETY: the slot is inside [head, tail) (checked above) and thus
        // initialized and published; only the consumer side reads it.
        unsafe {
            let buffer = &*self.buffer.get();
            Some(buffer[idx].assume_init_ref())
        }
    }

    /// Consumes and drops `n` items after the consumer inspected them via
    /// [`peek_at`](Self::peek_at).
    ///
    /// `n` must not exceed the current occupancy.
    pub fn advance(&self, n: usize) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);
        debug_assert_head_not_past_tail!(new_head, tail);
        debug_assert_monotonic!("head", head, new_head);

        for i in 0..n {
            let idx = (head.wrapping_add(i as u64) as usize) & self.mask;
            // SAFETY: slots [head, head+n) are initialized (caller stays
            // within occupancy) and not yet returned to the producer.
            unsafe {
                let buffer = &mut *self.buffer.get();
                ptr::drop_in_place(buffer[idx].as_mut_ptr());
            }
        }

        self.head.store(new_head, Ordering::Release);
    }

    /// Moves up to `max` items into `out` with a single head update.
    ///
    /// This is the batched drain the dispatcher builds on: the whole batch is
    /// read before the head advances once, amortizing the atomic traffic.
    pub fn drain_into(&self, out: &mut Vec<T>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }

        let head = self.head.load(Ordering::Relaxed);
        let Some(tail) = self.refreshed_tail(head) else {
            return 0;
        };

        let take = (tail.wrapping_sub(head) as usize).min(max);
        out.reserve(take);

        for i in 0..take {
            let idx = (head.wrapping_add(i as u64) as usize) & self.mask;
            // SAFETY: slots [head, head+take) are inside [head, tail):
            // initialized, published, and exclusively ours until the head
            // store below.
            let item = unsafe {
                let buffer = &*self.buffer.get();
                buffer[idx].assume_init_read()
            };
            out.push(item);
        }

        let new_head = head.wrapping_add(take as u64);
        debug_assert_head_not_past_tail!(new_head, tail);
        self.head.store(new_head, Ordering::Release);
        take
    }

    /// Consumer-side tail view, refreshing the cache only when it reads empty.
    #[inline]
    fn refreshed_tail(&self, head: u64) -> Option<u64> {
        // SAFETY: cached_tail has a single writer (the consumer side).
        let mut tail = unsafe { *self.cached_tail.get() };
        if tail == head {
            tail = self.tail.load(Ordering::Acquire);
            // SAFETY: single writer, see above.
            unsafe { *self.cached_tail.get() = tail };
            if tail == head {
                return None;
            }
        }
        Some(tail)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Drop all items still between head and tail.
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let count = tail.wrapping_sub(head) as usize;

        if count > 0 {
            let buffer = self.buffer.get_mut();
            for i in 0..count {
                let idx = ((head as usize).wrapping_add(i)) & self.mask;
                unsafe {
                    ptr::drop_in_place(buffer[idx].as_mut_ptr());
                }
            }
        }
    }
}

use crate::notify::Semaphore;
use crate::{Ring, RingError};
use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use std::io;
use thiserror::Error;

/// Errors creating a [`NotifyDispatcher`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The requested ring capacity is not a power of two ≥ 2.
    #[error(transparent)]
    InvalidCapacity(#[from] RingError),
    /// The notification fd could not be created.
    #[error("notification fd error: {0}")]
    Notify(#[from] io::Error),
}

/// Errors publishing through [`NotifyDispatcher::enqueue`].
#[derive(Debug, Error)]
pub enum EnqueueError<T> {
    /// The ring stayed full for the whole backoff window; the item is handed
    /// back to the caller.
    #[error("ring is full")]
    Full(T),
    /// The item WAS published, but posting its wake token failed. A later
    /// wake will still drain it; the error is advisory.
    #[error("wake token post failed: {0}")]
    Notify(#[source] io::Error),
}

/// Batched producer→consumer dispatcher over a [`Ring`].
///
/// Layers two things on the SPSC ring: a producer-side serializer that makes
/// `enqueue` MPSC-safe, and a semaphore-counting notification fd that lets
/// any number of producers wake one blocked consumer. Every successful
/// enqueue posts exactly one wake token; a consumer that drains several items
/// on one wake simply observes its next wakes as spurious (`next` returns 0).
pub struct NotifyDispatcher<T> {
    ring: Ring<T>,
    /// Serializes the ring's producer side for MPSC use.
    producer: Mutex<()>,
    /// Serializes the ring's consumer side when several workers drain.
    consumer: Mutex<()>,
    notify: Semaphore,
    batch_size: usize,
}

impl<T> NotifyDispatcher<T> {
    /// Creates a dispatcher over a fresh ring.
    ///
    /// `capacity` must be a power of two ≥ 2. A `batch_size` of 0 is treated
    /// as 1.
    pub fn with_capacity(capacity: usize, batch_size: usize) -> Result<Self, DispatchError> {
        Ok(Self {
            ring: Ring::with_capacity(capacity)?,
            producer: Mutex::new(()),
            consumer: Mutex::new(()),
            notify: Semaphore::new()?,
            batch_size: batch_size.max(1),
        })
    }

    /// Publishes one item and posts one wake token.
    ///
    /// Safe to call from any number of threads. A momentarily full ring is
    /// absorbed by a short adaptive backoff; a ring that stays full hands the
    /// item back as [`EnqueueError::Full`].
    pub fn enqueue(&self, mut item: T) -> Result<(), EnqueueError<T>> {
        {
            let _serialized = self.producer.lock();
            let backoff = Backoff::new();
            loop {
                match self.ring.push(item) {
                    Ok(()) => break,
                    Err(back) => {
                        if backoff.is_completed() {
                            return Err(EnqueueError::Full(back));
                        }
                        item = back;
                        backoff.snooze();
                    }
                }
            }
        }

        self.notify.post(1).map_err(EnqueueError::Notify)
    }

    /// Blocks until woken, then drains up to `batch_size` items into `batch`.
    ///
    /// Returns the number drained; 0 means a spurious wake (another consumer
    /// already took the items, or the wake was a shutdown nudge). Transient
    /// fd errors surface as `Err`; callers are expected to back off briefly
    /// and retry.
    pub fn next(&self, batch: &mut Vec<T>) -> io::Result<usize> {
        batch.clear();
        if !self.notify.wait()? {
            // Interrupted wait: report a spurious wake so the caller
            // re-checks its running state.
            return Ok(0);
        }

        let _serialized = self.consumer.lock();
        Ok(self.ring.drain_into(batch, self.batch_size))
    }

    /// Posts `wakes` tokens with no items behind them.
    ///
    /// Used at shutdown so every blocked consumer gets a zero-item wake and
    /// re-checks its running flag.
    pub fn notify_shutdown(&self, wakes: u64) -> io::Result<()> {
        self.notify.post(wakes.max(1))
    }

    /// Non-blocking defensive drain of everything currently reachable.
    pub fn drain_now(&self, batch: &mut Vec<T>) -> usize {
        batch.clear();
        let _serialized = self.consumer.lock();
        self.ring.drain_into(batch, self.ring.capacity())
    }

    /// Approximate number of undrained items.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true if no items are waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Ring capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Maximum items handed out per [`next`](Self::next) call.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_enqueue_then_next() {
        let d = NotifyDispatcher::with_capacity(8, 4).unwrap();
        d.enqueue(1u64).unwrap();
        d.enqueue(2u64).unwrap();

        let mut batch = Vec::new();
        let n = d.next(&mut batch).unwrap();
        assert!(n >= 1);
        assert_eq!(batch[0], 1);
    }

    #[test]
    fn test_batch_cap_respected() {
        let d = NotifyDispatcher::with_capacity(16, 3).unwrap();
        for i in 0..8u64 {
            d.enqueue(i).unwrap();
        }

        let mut batch = Vec::new();
        assert_eq!(d.next(&mut batch).unwrap(), 3);
        assert_eq!(batch, vec![0, 1, 2]);

        // One token per enqueue: the remaining tokens keep next() from
        // blocking even though one wake already drained several items.
        assert_eq!(d.next(&mut batch).unwrap(), 3);
        assert_eq!(batch, vec![3, 4, 5]);
    }

    #[test]
    fn test_full_hands_item_back() {
        let d = NotifyDispatcher::with_capacity(2, 2).unwrap();
        d.enqueue(1u64).unwrap();
        d.enqueue(2u64).unwrap();
        match d.enqueue(3u64) {
            Err(EnqueueError::Full(item)) => assert_eq!(item, 3),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_capacity() {
        assert!(matches!(
            NotifyDispatcher::<u64>::with_capacity(3, 1),
            Err(DispatchError::InvalidCapacity(_))
        ));
    }

    #[test]
    fn test_mpsc_from_many_threads() {
        let d = Arc::new(NotifyDispatcher::with_capacity(1024, 64).unwrap());
        let threads = 4u64;
        let per_thread = 500u64;

        let mut handles = Vec::new();
        for t in 0..threads {
            let d = Arc::clone(&d);
            handles.push(thread::spawn(move || {
                for i in 0..per_thread {
                    let mut item = t * 1000 + i;
                    loop {
                        match d.enqueue(item) {
                            Ok(()) => break,
                            Err(EnqueueError::Full(back)) => item = back,
                            Err(e) => panic!("enqueue failed: {e}"),
                        }
                    }
                }
            }));
        }

        let mut seen = 0usize;
        let mut batch = Vec::new();
        while seen < threads as usize * per_thread as usize {
            seen += d.next(&mut batch).unwrap();
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(d.is_empty());
    }

    #[test]
    fn test_shutdown_nudge_is_spurious_wake() {
        let d = NotifyDispatcher::<u64>::with_capacity(8, 4).unwrap();
        d.notify_shutdown(1).unwrap();

        let mut batch = Vec::new();
        assert_eq!(d.next(&mut batch).unwrap(), 0);
    }

    #[test]
    fn test_drain_now() {
        let d = NotifyDispatcher::with_capacity(8, 2).unwrap();
        for i in 0..5u64 {
            d.enqueue(i).unwrap();
        }

        let mut batch = Vec::new();
        assert_eq!(d.drain_now(&mut batch), 5);
        assert!(d.is_empty());
    }
}

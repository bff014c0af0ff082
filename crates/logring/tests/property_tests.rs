//! Property-based tests for the ring's occupancy and ordering guarantees.

use logring::{NotifyDispatcher, Ring};
use proptest::prelude::*;

proptest! {
    /// Occupancy never exceeds capacity after any sequence of operations.
    #[test]
    fn prop_bounded_count(
        writes in 0usize..200,
        reads in 0usize..200,
    ) {
        let ring = Ring::with_capacity(64).unwrap();
        let capacity = ring.capacity();

        let mut accepted = 0usize;
        for i in 0..writes {
            if ring.push(i as u64).is_ok() {
                accepted += 1;
            }
        }
        prop_assert!(ring.len() <= capacity,
            "occupancy {} exceeds capacity {} after writes", ring.len(), capacity);
        prop_assert!(accepted <= capacity);

        let mut popped = 0usize;
        for _ in 0..reads {
            if ring.pop().is_some() {
                popped += 1;
            }
        }
        prop_assert!(popped <= accepted, "popped more than accepted: {} > {}", popped, accepted);
        prop_assert!(ring.len() <= capacity);
    }

    /// Items come out in the order they went in, regardless of how the
    /// operations interleave.
    #[test]
    fn prop_fifo_order(
        ops in prop::collection::vec(prop::bool::ANY, 1..200),
    ) {
        let ring = Ring::with_capacity(32).unwrap();
        let mut next_in = 0u64;
        let mut next_out = 0u64;

        for is_push in ops {
            if is_push {
                if ring.push(next_in).is_ok() {
                    next_in += 1;
                }
            } else if let Some(item) = ring.pop() {
                prop_assert_eq!(item, next_out);
                next_out += 1;
            }
        }

        // Drain the rest; order must continue seamlessly.
        while let Some(item) = ring.pop() {
            prop_assert_eq!(item, next_out);
            next_out += 1;
        }
        prop_assert_eq!(next_out, next_in);
    }

    /// Draining in batches observes the same sequence as popping one by one.
    #[test]
    fn prop_drain_matches_pop(
        items in prop::collection::vec(any::<u64>(), 0..64),
        chunk in 1usize..16,
    ) {
        let ring = Ring::with_capacity(64).unwrap();
        for &item in &items {
            ring.push(item).unwrap();
        }

        let mut drained = Vec::new();
        let mut chunk_buf = Vec::new();
        loop {
            chunk_buf.clear();
            if ring.drain_into(&mut chunk_buf, chunk) == 0 {
                break;
            }
            drained.extend_from_slice(&chunk_buf);
        }
        prop_assert_eq!(drained, items);
    }

    /// The dispatcher never loses or duplicates items.
    #[test]
    fn prop_dispatcher_conserves_items(
        items in prop::collection::vec(any::<u64>(), 1..100),
        batch_size in 1usize..16,
    ) {
        let d = NotifyDispatcher::with_capacity(128, batch_size).unwrap();
        for &item in &items {
            d.enqueue(item).unwrap();
        }

        let mut received = Vec::new();
        let mut batch = Vec::new();
        while received.len() < items.len() {
            let n = d.next(&mut batch).unwrap();
            prop_assert!(n <= batch_size);
            received.extend_from_slice(&batch[..n]);
        }
        prop_assert_eq!(received, items);
    }
}

//! Debug assertion macros for ring invariants.
//!
//! Active only in debug builds, so there is zero overhead in release builds.
//! Messages name the violated property.

/// Assert that occupancy never exceeds capacity.
///
/// Holds because the producer refuses to publish into a full ring.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "ring occupancy {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that the consumer never advances past the producer.
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head <= $tail,
            "head {} advanced beyond tail {}",
            $new_head,
            $tail
        )
    };
}

/// Assert that a sequence number only increases.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} sequence decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

pub(crate) use {debug_assert_bounded_count, debug_assert_head_not_past_tail, debug_assert_monotonic};

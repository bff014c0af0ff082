use std::sync::atomic::{AtomicU64, Ordering};

/// Store-wide counters. All relaxed; they observe, never synchronize.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    pub appends: AtomicU64,
    pub append_retries: AtomicU64,
    pub records_flushed: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub fsyncs: AtomicU64,
    pub fallback_writes: AtomicU64,
    pub index_backfills: AtomicU64,
    pub close_leaks: AtomicU64,
}

impl Metrics {
    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            append_retries: self.append_retries.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            fsyncs: self.fsyncs.load(Ordering::Relaxed),
            fallback_writes: self.fallback_writes.load(Ordering::Relaxed),
            index_backfills: self.index_backfills.load(Ordering::Relaxed),
            close_leaks: self.close_leaks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the store's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests accepted by `append`.
    pub appends: u64,
    /// Retry bursts surfaced while the ring stayed full (one per 1,000).
    pub append_retries: u64,
    /// Records committed to the data file.
    pub records_flushed: u64,
    /// Batches committed to the data file.
    pub batches_flushed: u64,
    /// fsync calls issued by workers and the background thread.
    pub fsyncs: u64,
    /// Batches that took the per-record fallback write path.
    pub fallback_writes: u64,
    /// Ordered-map hits copied into the fast-index on a read miss.
    pub index_backfills: u64,
    /// Requests still outstanding when close finished draining.
    pub close_leaks: u64,
}

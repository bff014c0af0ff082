//! Durability policies and their bookkeeping.
//!
//! Workers call [`Durability::after_batch`] once per committed batch; the
//! policy decides whether that call reaches `fsync`. Under
//! `Interval` + `background_fsync` the per-batch call is a no-op and a
//! dedicated thread owns the fsync cadence instead (see `worker`).

use crate::config::StoreConfig;
use crate::metrics::Metrics;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// When buffered writes are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// Never fsync from the worker. A crash may lose any buffered batches.
    None,
    /// fsync after every successful batch commit.
    #[default]
    EachBatch,
    /// fsync at most once per configured interval.
    Interval,
    /// fsync after every N batches.
    EveryN,
}

pub(crate) struct Durability {
    policy: FsyncPolicy,
    interval: Duration,
    every_n: u64,
    background: bool,
    batches_since_fsync: AtomicU64,
    last_fsync: Mutex<Instant>,
}

impl Durability {
    pub fn new(cfg: &StoreConfig) -> Self {
        Self {
            policy: cfg.fsync_policy,
            interval: cfg.fsync_interval,
            every_n: cfg.effective_every_n(),
            background: cfg.background_fsync,
            batches_since_fsync: AtomicU64::new(0),
            last_fsync: Mutex::new(Instant::now()),
        }
    }

    /// True when a dedicated fsync thread owns the cadence.
    #[inline]
    pub fn background_thread_enabled(&self) -> bool {
        self.policy == FsyncPolicy::Interval && self.background
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Applies the policy after one committed batch.
    pub fn after_batch(&self, file: &File, metrics: &Metrics) -> io::Result<()> {
        match self.policy {
            FsyncPolicy::None => Ok(()),
            FsyncPolicy::EachBatch => self.fsync_now(file, metrics),
            FsyncPolicy::EveryN => {
                let batches = self.batches_since_fsync.fetch_add(1, Ordering::Relaxed) + 1;
                if batches >= self.every_n {
                    self.batches_since_fsync.store(0, Ordering::Relaxed);
                    self.fsync_now(file, metrics)
                } else {
                    Ok(())
                }
            }
            FsyncPolicy::Interval => {
                if self.background {
                    return Ok(());
                }
                let mut last = self.last_fsync.lock();
                if last.elapsed() >= self.interval {
                    self.fsync_now(file, metrics)?;
                    *last = Instant::now();
                }
                Ok(())
            }
        }
    }

    /// Unconditional fsync; used by the background thread and at close.
    pub fn fsync_now(&self, file: &File, metrics: &Metrics) -> io::Result<()> {
        file.sync_all()?;
        Metrics::incr(&metrics.fsyncs);
        Ok(())
    }

    /// Timestamp an fsync issued by the background thread.
    pub fn mark_background_fsync(&self) {
        *self.last_fsync.lock() = Instant::now();
    }
}

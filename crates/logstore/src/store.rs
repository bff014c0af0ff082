//! Store lifecycle and the public operation surface.

use crate::config::StoreConfig;
use crate::durability::Durability;
use crate::error::StoreError;
use crate::fastindex::FastIndex;
use crate::index::LocatorIndex;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::record::{decode_header, Locator, HEADER_LEN, KLEN_SANITY_CAP};
use crate::request::{AppendRequest, Request};
use crate::scan::ScanStats;
use crate::{rebuild, scan, worker};
use logring::{EnqueueError, NotifyDispatcher};
use parking_lot::Mutex;
use std::fs::File;
use std::ops::ControlFlow;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Name of the append-only data file inside the store directory.
pub const DATA_FILE_NAME: &str = "aof.log";

// Append retry backoff: start small, grow until capped, and surface the
// pressure once per thousand retries.
const RETRY_START: Duration = Duration::from_micros(50);
const RETRY_STEP: Duration = Duration::from_micros(10);
const RETRY_CAP: Duration = Duration::from_millis(2);
const RETRIES_PER_REPORT: u64 = 1_000;

/// Shared state behind every handle the store gives out.
pub(crate) struct StoreInner {
    pub file: File,
    pub index: LocatorIndex,
    pub fast: FastIndex,
    pub dispatcher: NotifyDispatcher<Request>,
    /// Serializes each worker's dequeue together with its file append and
    /// index updates, so commit order across workers follows dispatcher
    /// dequeue order. Taken before `next`, released after the batch commits.
    pub flush_lock: Mutex<()>,
    pub durability: Durability,
    pub batch_size: usize,
    pub max_key: usize,
    pub max_value: usize,
    pub worker_count: usize,
    pub running: AtomicBool,
    pub workers_ready: AtomicUsize,
    pub sentinel_drained: AtomicBool,
    pub outstanding: AtomicU64,
    pub seq: AtomicU64,
    pub metrics: Metrics,
}

impl StoreInner {
    /// Validates, copies, counts, and enqueues one append request.
    fn append(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty"));
        }
        if key.len() > self.max_key {
            return Err(StoreError::KeyTooLarge {
                len: key.len(),
                max: self.max_key,
            });
        }
        if value.len() > self.max_value {
            return Err(StoreError::ValueTooLarge {
                len: value.len(),
                max: self.max_value,
            });
        }
        if !self.running.load(Ordering::Acquire) {
            return Err(StoreError::Shutdown);
        }

        let request = AppendRequest::new(key, value);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Metrics::incr(&self.metrics.appends);

        let mut pending = Request::Append(request);
        let mut delay = RETRY_START;
        let mut retries = 0u64;
        loop {
            match self.dispatcher.enqueue(pending) {
                Ok(()) => return Ok(()),
                Err(EnqueueError::Full(back)) => {
                    if !self.running.load(Ordering::Acquire) {
                        // Release on the spot; workers will never see it.
                        drop(back);
                        self.outstanding.fetch_sub(1, Ordering::Relaxed);
                        return Err(StoreError::Shutdown);
                    }
                    retries += 1;
                    if retries % RETRIES_PER_REPORT == 0 {
                        Metrics::incr(&self.metrics.append_retries);
                        warn!(retries, "append retrying against a full ring");
                    }
                    thread::sleep(delay);
                    delay = (delay * 3 / 2 + RETRY_STEP).min(RETRY_CAP);
                    pending = back;
                }
                Err(EnqueueError::Notify(e)) => {
                    // The request is in the ring; a later wake drains it.
                    warn!(error = %e, "wake token post failed after enqueue");
                    return Ok(());
                }
            }
        }
    }

    /// Read path: fast-index, then ordered-map with back-fill, then the file.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty"));
        }
        if key.len() > self.max_key {
            return Err(StoreError::KeyTooLarge {
                len: key.len(),
                max: self.max_key,
            });
        }

        let loc = match self.fast.get(key) {
            Some(loc) => loc,
            None => match self.index.get(key)? {
                Some(loc) => {
                    // Brief write lock to remember the hit.
                    self.fast.insert(key, loc);
                    Metrics::incr(&self.metrics.index_backfills);
                    loc
                }
                None => return Err(StoreError::NotFound),
            },
        };

        let mut header = [0u8; HEADER_LEN];
        if self.file.read_exact_at(&mut header, loc.offset).is_err() {
            return Err(StoreError::NotFound);
        }
        let (klen, vlen) = decode_header(&header);
        // An index/file mismatch reads as absence, never as someone else's
        // bytes.
        if klen == 0 || klen > KLEN_SANITY_CAP || vlen != loc.len {
            return Err(StoreError::NotFound);
        }

        let mut value = vec![0u8; vlen as usize];
        if self
            .file
            .read_exact_at(&mut value, loc.value_offset(klen))
            .is_err()
        {
            return Err(StoreError::NotFound);
        }
        Ok(value)
    }
}

/// An embeddable, durable key→value log store.
///
/// One handle per open directory. `append` stages a request and returns;
/// flush workers make it visible and the configured policy makes it stable.
/// Reads see only flushed writes; callers that need write-visible reads
/// poll (see [`wait_visible`](Self::wait_visible)).
pub struct LogStore {
    inner: Arc<StoreInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    fsync_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogStore {
    /// Opens a store with full configuration.
    pub fn open_cfg(cfg: &StoreConfig) -> Result<Self, StoreError> {
        if cfg.bucket.is_empty() {
            return Err(StoreError::InvalidArgument("bucket must not be empty"));
        }

        let mut dirs = std::fs::DirBuilder::new();
        dirs.recursive(true).mode(0o755);
        dirs.create(&cfg.dir)?;

        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o664)
            .open(cfg.dir.join(DATA_FILE_NAME))?;

        let index = LocatorIndex::open(&cfg.dir, &cfg.bucket, cfg.map_size)?;
        let fast = FastIndex::new();
        let dispatcher =
            NotifyDispatcher::with_capacity(cfg.ring_capacity, cfg.effective_batch_size())?;

        if cfg.rebuild_on_open {
            rebuild::rebuild(
                &file,
                &index,
                &fast,
                cfg.effective_max_key(),
                cfg.effective_max_value(),
                cfg.truncate_on_rebuild,
            )?;
        } else {
            // Preload the fast-index so reopened keys take the fast path.
            index.for_each(|key, raw| {
                if let Some(loc) = Locator::from_bytes(raw) {
                    fast.insert(key, loc);
                }
                ControlFlow::Continue(())
            })?;
        }

        let worker_count = cfg.effective_workers();
        let inner = Arc::new(StoreInner {
            file,
            index,
            fast,
            dispatcher,
            flush_lock: Mutex::new(()),
            durability: Durability::new(cfg),
            batch_size: cfg.effective_batch_size(),
            max_key: cfg.effective_max_key(),
            max_value: cfg.effective_max_value(),
            worker_count,
            running: AtomicBool::new(true),
            workers_ready: AtomicUsize::new(0),
            sentinel_drained: AtomicBool::new(false),
            outstanding: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            metrics: Metrics::default(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("logstore-flush-{id}"))
                .spawn(move || worker::run(&inner, id))?;
            workers.push(handle);
        }
        // Publish start-up: don't return until every worker is in its loop.
        while inner.workers_ready.load(Ordering::Acquire) < worker_count {
            thread::yield_now();
        }

        let fsync_thread = if inner.durability.background_thread_enabled() {
            let inner = Arc::clone(&inner);
            Some(
                thread::Builder::new()
                    .name("logstore-fsync".into())
                    .spawn(move || worker::run_background_fsync(inner))?,
            )
        } else {
            None
        };

        debug!(dir = %cfg.dir.display(), workers = worker_count, "store opened");
        Ok(Self {
            inner,
            workers: Mutex::new(workers),
            fsync_thread: Mutex::new(fsync_thread),
        })
    }

    /// Convenience open with defaults for everything else.
    pub fn open(
        dir: impl AsRef<Path>,
        bucket: &str,
        map_size: usize,
        ring_capacity: usize,
    ) -> Result<Self, StoreError> {
        let mut cfg = StoreConfig::new(dir.as_ref(), bucket);
        cfg.map_size = map_size;
        cfg.ring_capacity = ring_capacity;
        Self::open_cfg(&cfg)
    }

    /// Stages one key/value pair for flushing.
    ///
    /// Success means the request is owned by the pipeline, not that it is
    /// visible or durable yet. A full ring is absorbed by bounded
    /// exponential backoff; shutdown observed while retrying fails fast.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.append(key, value)
    }

    /// Returns the most recently flushed value for `key`.
    ///
    /// Pending (staged but unflushed) appends are invisible. Any index/file
    /// mismatch reads as [`StoreError::NotFound`]; run
    /// [`integrity_scan`](Self::integrity_scan) to tell the cases apart.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key)
    }

    /// Polls `get` until the key is visible or the timeout elapses.
    ///
    /// The recommended pattern for callers that need write-visible reads.
    pub fn wait_visible(&self, key: &[u8], timeout: Duration) -> Result<Vec<u8>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.get(key) {
                Err(StoreError::NotFound) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_micros(500));
                }
                other => return other,
            }
        }
    }

    /// Hooks a log-line sink onto this store.
    ///
    /// Fails once close has begun.
    pub fn attach_line_sink(&self) -> Result<LineSink, StoreError> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(StoreError::Shutdown);
        }
        Ok(LineSink {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Cross-checks every index entry against the data file.
    pub fn integrity_scan(&self, prune: bool) -> Result<ScanStats, StoreError> {
        scan::integrity_scan(&self.inner.file, &self.inner.index, &self.inner.fast, prune)
    }

    /// Test-only: plants a locator in both indexes without writing a record.
    pub fn debug_put_index(&self, key: &[u8], offset: u64, len: u32) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty"));
        }
        let loc = Locator { offset, len };
        self.inner.index.put(key, loc)?;
        self.inner.fast.insert(key, loc);
        Ok(())
    }

    /// Test-only: looks a key up in the indexes without touching the file.
    pub fn debug_lookup(&self, key: &[u8]) -> Result<(u64, u32), StoreError> {
        if let Some(loc) = self.inner.fast.get(key) {
            return Ok((loc.offset, loc.len));
        }
        match self.inner.index.get(key)? {
            Some(loc) => Ok((loc.offset, loc.len)),
            None => Err(StoreError::NotFound),
        }
    }

    /// Point-in-time counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Shuts the store down: stops intake, drains, joins, tears down.
    ///
    /// Idempotent; also invoked by `Drop`. Best-effort: failures along the
    /// way are logged, the teardown completes regardless, and leaks show up
    /// in the metrics.
    pub fn close(&self) {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        // The sentinel wakes a worker even if no data is pending. Workers
        // keep draining, so a full ring clears; retry until it fits.
        let mut sentinel = Request::Sentinel;
        loop {
            match self.inner.dispatcher.enqueue(sentinel) {
                Ok(()) => break,
                Err(EnqueueError::Full(back)) => {
                    sentinel = back;
                    thread::sleep(Duration::from_micros(100));
                }
                Err(EnqueueError::Notify(e)) => {
                    warn!(error = %e, "sentinel wake post failed");
                    break;
                }
            }
        }
        if let Err(e) = self
            .inner
            .dispatcher
            .notify_shutdown(self.inner.worker_count as u64)
        {
            warn!(error = %e, "shutdown wake post failed");
        }

        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                error!("flush worker panicked");
            }
        }
        if let Some(handle) = self.fsync_thread.lock().take() {
            if handle.join().is_err() {
                error!("background fsync thread panicked");
            }
        }

        // Workers already drained defensively; one more pass catches a
        // request that slipped in between their last check and now.
        let mut leftovers = Vec::new();
        if self.inner.dispatcher.drain_now(&mut leftovers) > 0 {
            let stray = leftovers.iter().filter(|r| !r.is_sentinel()).count() as u64;
            if stray > 0 {
                self.inner.outstanding.fetch_sub(stray, Ordering::Relaxed);
            }
        }

        let leaked = self.inner.outstanding.load(Ordering::Relaxed);
        if leaked != 0 {
            Metrics::add(&self.inner.metrics.close_leaks, leaked);
            error!(leaked, "requests still outstanding after close drain");
        }

        if let Err(e) = self.inner.file.sync_all() {
            error!(error = %e, "final fsync failed at close");
        }
        debug!("store closed");
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Log-line ingestion hook for an external asynchronous logger.
///
/// Each line is stored under a 16-byte key `ts_ns(8) ‖ seq(8)` in native
/// byte order, where `seq` is the store's monotonic counter.
pub struct LineSink {
    inner: Arc<StoreInner>,
}

impl LineSink {
    /// Appends one log line under a timestamp+sequence key.
    pub fn write_line(&self, line: &[u8]) -> Result<(), StoreError> {
        let ts_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&ts_ns.to_ne_bytes());
        key[8..].copy_from_slice(&seq.to_ne_bytes());
        self.inner.append(&key, line)
    }
}

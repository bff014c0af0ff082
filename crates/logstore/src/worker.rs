//! Flush workers: the ring's sole consumers.
//!
//! Each worker drains request batches from the dispatcher, appends them to
//! the data file with one vectored write, publishes locators to both
//! indexes, applies the durability policy, and releases the requests. Write
//! errors are logged and never terminate the worker; the requests of a
//! failed batch are still released so the outstanding counter stays honest.

use crate::metrics::Metrics;
use crate::record::{record_len, Locator};
use crate::request::{AppendRequest, Request};
use crate::store::StoreInner;
use std::io;
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Ceiling on segments handed to one vectored write; batches past it take
/// the per-record fallback path (matches the kernel's IOV_MAX floor).
const MAX_WRITE_SEGMENTS: usize = 1024;

/// Idle backoff after a transient dispatcher error.
const TRANSIENT_ERROR_NAP: Duration = Duration::from_millis(1);

pub(crate) fn run(inner: &Arc<StoreInner>, id: usize) {
    let mut batch: Vec<Request> = Vec::with_capacity(inner.batch_size);
    let mut live: Vec<AppendRequest> = Vec::with_capacity(inner.batch_size);

    inner.workers_ready.fetch_add(1, Ordering::Release);
    debug!(worker = id, "flush worker started");

    loop {
        // The flush lock spans dequeue AND commit: a batch dequeued earlier
        // always reaches the file and the indexes before a batch dequeued
        // later, so last-writer-wins follows dequeue order across workers.
        let flush_guard = inner.flush_lock.lock();

        match inner.dispatcher.next(&mut batch) {
            Ok(_) => {}
            Err(e) => {
                drop(flush_guard);
                if !inner.running.load(Ordering::Acquire) && inner.dispatcher.is_empty() {
                    break;
                }
                error!(worker = id, error = %e, "dispatcher wait failed");
                thread::sleep(TRANSIENT_ERROR_NAP);
                continue;
            }
        }

        // A sole sentinel is just a shutdown wake; a mixed batch still
        // flushes its live records first.
        let mut saw_sentinel = false;
        live.clear();
        for req in batch.drain(..) {
            match req {
                Request::Sentinel => saw_sentinel = true,
                Request::Append(r) => live.push(r),
            }
        }
        if saw_sentinel {
            inner.sentinel_drained.store(true, Ordering::Release);
        }

        if !live.is_empty() {
            match flush_batch(inner, &live) {
                Ok(()) => {
                    Metrics::add(&inner.metrics.records_flushed, live.len() as u64);
                    Metrics::incr(&inner.metrics.batches_flushed);
                }
                Err(e) => {
                    error!(worker = id, error = %e, records = live.len(), "batch flush failed");
                }
            }
        }
        drop(flush_guard);

        // Release outside the lock.
        if !live.is_empty() {
            let released = live.len() as u64;
            live.clear();
            inner.outstanding.fetch_sub(released, Ordering::Relaxed);
        }

        if !inner.running.load(Ordering::Acquire)
            && inner.dispatcher.is_empty()
            && inner.sentinel_drained.load(Ordering::Acquire)
        {
            break;
        }
    }

    // Defensive drain: anything still reachable is released unflushed so the
    // close-time leak count reflects true losses only.
    let mut leftovers = Vec::new();
    if inner.dispatcher.drain_now(&mut leftovers) > 0 {
        let stray = leftovers.iter().filter(|r| !r.is_sentinel()).count() as u64;
        if stray > 0 {
            inner.outstanding.fetch_sub(stray, Ordering::Relaxed);
            warn!(worker = id, count = stray, "released unflushed requests at shutdown");
        }
    }

    // Pass the shutdown baton: a sibling still blocked in next() gets a
    // zero-item wake and re-checks its running flag.
    if let Err(e) = inner.dispatcher.notify_shutdown(1) {
        warn!(worker = id, error = %e, "shutdown baton post failed");
    }
    debug!(worker = id, "flush worker stopped");
}

/// Commits one batch: contiguous vectored append at the current file end,
/// then locators into the ordered-map and the fast-index, then the
/// durability policy.
///
/// Caller holds the store's flush lock (taken before dequeue), so the file
/// end probed here cannot move under us and commits land in dequeue order.
fn flush_batch(inner: &StoreInner, batch: &[AppendRequest]) -> Result<(), crate::StoreError> {
    debug_assert!(inner.flush_lock.is_locked());

    let base = file_end(&inner.file)?;

    // Per-record length segments kept separate so the iovec mirrors the
    // on-disk layout [klen][vlen][key][value] exactly, in batch order.
    let mut klens = Vec::with_capacity(batch.len());
    let mut vlens = Vec::with_capacity(batch.len());
    let mut offsets = Vec::with_capacity(batch.len());
    let mut cursor = base;
    for req in batch {
        klens.push(req.klen().to_le_bytes());
        vlens.push(req.vlen().to_le_bytes());
        offsets.push(cursor);
        cursor += record_len(req.klen(), req.vlen());
    }

    if batch.len() * 4 > MAX_WRITE_SEGMENTS {
        Metrics::incr(&inner.metrics.fallback_writes);
        write_batch_fallback(&inner.file, batch, &klens, &vlens)?;
    } else {
        let mut segments = Vec::with_capacity(batch.len() * 4);
        for (i, req) in batch.iter().enumerate() {
            segments.push(&klens[i][..]);
            segments.push(&vlens[i][..]);
            segments.push(req.key());
            segments.push(req.value());
        }
        write_all_vectored_at(&inner.file, &segments, base)?;
    }

    // A record becomes visible only once its locator lands; the fsync
    // policy decides when it becomes stable.
    for (req, &offset) in batch.iter().zip(&offsets) {
        let loc = Locator {
            offset,
            len: req.vlen(),
        };
        inner.index.put(req.key(), loc)?;
        inner.fast.insert(req.key(), loc);
    }

    inner.durability.after_batch(&inner.file, &inner.metrics)?;
    Ok(())
}

/// Dedicated fsync cadence for `Interval` + `background_fsync`.
pub(crate) fn run_background_fsync(inner: Arc<StoreInner>) {
    let interval = inner.durability.interval();
    debug!("background fsync thread started");

    while inner.running.load(Ordering::Acquire) {
        // Sleep in short slices so shutdown is observed promptly.
        let mut remaining = interval;
        while !remaining.is_zero() && inner.running.load(Ordering::Acquire) {
            let slice = remaining.min(Duration::from_millis(5));
            thread::sleep(slice);
            remaining -= slice;
        }
        if !inner.running.load(Ordering::Acquire) {
            break;
        }
        match inner.durability.fsync_now(&inner.file, &inner.metrics) {
            Ok(()) => inner.durability.mark_background_fsync(),
            Err(e) => error!(error = %e, "background fsync failed"),
        }
    }

    // One final fsync covers whatever the last interval missed.
    if let Err(e) = inner.durability.fsync_now(&inner.file, &inner.metrics) {
        error!(error = %e, "final fsync failed");
    }
    debug!("background fsync thread stopped");
}

fn file_end(file: &std::fs::File) -> io::Result<u64> {
    let end = nix::unistd::lseek(file.as_raw_fd(), 0, nix::unistd::Whence::SeekEnd)
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    Ok(end as u64)
}

/// One positional scatter-write of the whole batch, completed across
/// partial writes. The iovec order is authoritative: records land
/// contiguously, in batch order.
#[cfg(target_os = "linux")]
fn write_all_vectored_at(
    file: &std::fs::File,
    segments: &[&[u8]],
    base: u64,
) -> io::Result<()> {
    use std::io::IoSlice;

    let total: usize = segments.iter().map(|s| s.len()).sum();
    let mut written = 0usize;

    while written < total {
        let mut iov = Vec::with_capacity(segments.len());
        let mut skip = written;
        for seg in segments {
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            iov.push(IoSlice::new(&seg[skip..]));
            skip = 0;
        }

        let offset = (base + written as u64) as nix::libc::off_t;
        match nix::sys::uio::pwritev(file, &iov, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
    Ok(())
}

/// Kernels without positional scatter-write: seek to the end once, then a
/// plain vectored write at the cursor (the commit lock serializes cursor
/// use).
#[cfg(all(unix, not(target_os = "linux")))]
fn write_all_vectored_at(
    file: &std::fs::File,
    segments: &[&[u8]],
    base: u64,
) -> io::Result<()> {
    use std::io::IoSlice;

    let total: usize = segments.iter().map(|s| s.len()).sum();
    let mut written = 0usize;

    while written < total {
        nix::unistd::lseek(
            file.as_raw_fd(),
            (base + written as u64) as nix::libc::off_t,
            nix::unistd::Whence::SeekSet,
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

        let mut iov = Vec::with_capacity(segments.len());
        let mut skip = written;
        for seg in segments {
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            iov.push(IoSlice::new(&seg[skip..]));
            skip = 0;
        }

        match nix::sys::uio::writev(file, &iov) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
    Ok(())
}

/// Per-record fallback: seek to the end, then the four segments of each
/// record as sequential writes. Same index-update and fsync semantics as
/// the vectored path; never leaks requests (the caller releases them).
fn write_batch_fallback(
    file: &std::fs::File,
    batch: &[AppendRequest],
    klens: &[[u8; 4]],
    vlens: &[[u8; 4]],
) -> io::Result<()> {
    for (i, req) in batch.iter().enumerate() {
        nix::unistd::lseek(file.as_raw_fd(), 0, nix::unistd::Whence::SeekEnd)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        write_all_at_cursor(file, &klens[i])?;
        write_all_at_cursor(file, &vlens[i])?;
        write_all_at_cursor(file, req.key())?;
        write_all_at_cursor(file, req.value())?;
    }
    Ok(())
}

fn write_all_at_cursor(file: &std::fs::File, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match nix::unistd::write(file, buf) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => buf = &buf[n..],
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
    Ok(())
}

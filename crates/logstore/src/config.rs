use crate::durability::FsyncPolicy;
use crate::record::{HARD_KEY_MAX, HARD_VALUE_MAX};
use std::path::PathBuf;
use std::time::Duration;

/// Default flush batch size when the configured value is 0.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Configuration for opening a store.
///
/// `dir` and `bucket` are required; everything else has a workable default.
/// Zero means "use the default" for `batch_size`, `fsync_every_n`,
/// `workers`, `map_size`, and the two maxima.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base directory for the data file and the ordered-map's own files.
    pub dir: PathBuf,
    /// Name of the ordered-map bucket holding locators.
    pub bucket: String,
    /// Ordered-map size hint in bytes; 0 keeps the library default.
    pub map_size: usize,
    /// Staging ring slots; must be a power of two ≥ 2.
    pub ring_capacity: usize,
    /// Maximum records per flush batch; 0 ⇒ 32.
    pub batch_size: usize,
    /// When buffered writes are forced to stable storage.
    pub fsync_policy: FsyncPolicy,
    /// Minimum spacing between fsyncs under [`FsyncPolicy::Interval`].
    pub fsync_interval: Duration,
    /// Batches between fsyncs under [`FsyncPolicy::EveryN`]; 0 ⇒ 1.
    pub fsync_every_n: u64,
    /// Scan the data file on open and rebuild both indexes from it.
    pub rebuild_on_open: bool,
    /// Truncate a torn tail discovered during rebuild.
    pub truncate_on_rebuild: bool,
    /// With [`FsyncPolicy::Interval`], run fsync on a dedicated thread.
    pub background_fsync: bool,
    /// Caller key-length maximum; capped by the 32 MiB hard limit. 0 ⇒ hard limit.
    pub max_key_bytes: usize,
    /// Caller value-length maximum; capped by the 128 MiB hard limit. 0 ⇒ hard limit.
    pub max_value_bytes: usize,
    /// Flush worker threads; 0 ⇒ 1.
    pub workers: usize,
}

impl StoreConfig {
    /// Configuration with defaults for everything but the required fields.
    pub fn new(dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            bucket: bucket.into(),
            map_size: 0,
            ring_capacity: 256,
            batch_size: 0,
            fsync_policy: FsyncPolicy::EachBatch,
            fsync_interval: Duration::from_millis(100),
            fsync_every_n: 0,
            rebuild_on_open: false,
            truncate_on_rebuild: false,
            background_fsync: false,
            max_key_bytes: 0,
            max_value_bytes: 0,
            workers: 0,
        }
    }

    #[inline]
    pub(crate) fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }

    #[inline]
    pub(crate) fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }

    #[inline]
    pub(crate) fn effective_max_key(&self) -> usize {
        if self.max_key_bytes == 0 {
            HARD_KEY_MAX
        } else {
            self.max_key_bytes.min(HARD_KEY_MAX)
        }
    }

    #[inline]
    pub(crate) fn effective_max_value(&self) -> usize {
        if self.max_value_bytes == 0 {
            HARD_VALUE_MAX
        } else {
            self.max_value_bytes.min(HARD_VALUE_MAX)
        }
    }

    #[inline]
    pub(crate) fn effective_every_n(&self) -> u64 {
        self.fsync_every_n.max(1)
    }
}

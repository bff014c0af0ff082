//! LogStore - Embeddable Append-Only key→value Log Store
//!
//! A durable, high-throughput ingestion sink: appends land in a staging
//! ring, flush workers batch them into a single vectored write against an
//! append-only data file, and a 12-byte locator per key goes to an embedded
//! ordered-map (LMDB) plus an in-process hash fast-index. Durability is a
//! pluggable fsync policy; crash recovery rescans the file and can truncate
//! a torn tail.
//!
//! # Example
//!
//! ```no_run
//! use logstore::{LogStore, StoreConfig};
//! use std::time::Duration;
//!
//! let store = LogStore::open_cfg(&StoreConfig::new("/tmp/sink", "idx"))?;
//! store.append(b"alpha", b"one")?;
//!
//! // Reads see a write only after a worker has flushed it.
//! let value = store.wait_visible(b"alpha", Duration::from_secs(1))?;
//! assert_eq!(value, b"one");
//! store.close();
//! # Ok::<(), logstore::StoreError>(())
//! ```
//!
//! # Visibility and durability
//!
//! `append` returning is ownership transfer, nothing more. A key becomes
//! *visible* once a flush worker has written its record and published its
//! locator, and *stable* per the configured [`FsyncPolicy`]. Overwrites are
//! new records; the most recently flushed one wins both indexes and the
//! superseded record stays on disk as dead weight (no compaction).

mod config;
mod durability;
mod error;
mod fastindex;
mod index;
mod metrics;
mod rebuild;
mod record;
mod request;
mod scan;
mod store;
mod worker;

pub use config::{StoreConfig, DEFAULT_BATCH_SIZE};
pub use durability::FsyncPolicy;
pub use error::StoreError;
pub use metrics::MetricsSnapshot;
pub use record::{Locator, HARD_KEY_MAX, HARD_VALUE_MAX};
pub use scan::ScanStats;
pub use store::{LineSink, LogStore, DATA_FILE_NAME};

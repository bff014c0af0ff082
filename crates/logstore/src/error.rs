use logring::DispatchError;
use std::io;
use thiserror::Error;

/// Error types for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A caller-supplied argument was rejected before any work happened.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Key length exceeds the configured or hard maximum.
    #[error("key length {len} exceeds maximum {max}")]
    KeyTooLarge { len: usize, max: usize },

    /// Value length exceeds the configured or hard maximum.
    #[error("value length {len} exceeds maximum {max}")]
    ValueTooLarge { len: usize, max: usize },

    /// The store is not running (close has begun or completed).
    #[error("store is shut down")]
    Shutdown,

    /// Key absent from both indexes, or the indexed record did not check out.
    #[error("key not found")]
    NotFound,

    /// Ordered-map failure.
    #[error("index error: {0}")]
    Index(#[from] heed::Error),

    /// Data-file I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A record or index entry failed validation during rebuild or scan.
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: &'static str },
}

impl StoreError {
    /// Returns true when the condition is the caller's to fix (bad input),
    /// as opposed to an environmental failure.
    #[inline]
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::KeyTooLarge { .. } | Self::ValueTooLarge { .. }
        )
    }
}

impl From<DispatchError> for StoreError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::InvalidCapacity(_) => {
                Self::InvalidArgument("ring capacity must be a power of two >= 2")
            }
            DispatchError::Notify(e) => Self::Io(e),
        }
    }
}

//! Crash-recovery rebuild: reconstruct both indexes from the data file.
//!
//! Walks the file from offset 0. Each record must present a readable
//! header, a readable key, and its final value byte (the probe proving the
//! value is fully on disk). The walk stops at the first record that fails
//! any check; everything before that point is re-indexed, and the torn tail
//! past it can optionally be truncated.

use crate::error::StoreError;
use crate::fastindex::FastIndex;
use crate::index::LocatorIndex;
use crate::record::{decode_header, record_len, Locator, HARD_KEY_MAX, HARD_VALUE_MAX, HEADER_LEN};
use std::fs::File;
use std::os::unix::fs::FileExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RebuildOutcome {
    /// Complete records re-indexed.
    pub records: u64,
    /// File offset just past the last complete record.
    pub last_good_end: u64,
    /// Whether a torn tail was cut off.
    pub truncated: bool,
}

pub(crate) fn rebuild(
    file: &File,
    index: &LocatorIndex,
    fast: &FastIndex,
    max_key: usize,
    max_value: usize,
    truncate: bool,
) -> Result<RebuildOutcome, StoreError> {
    let file_len = file.metadata()?.len();
    let mut offset = 0u64;
    let mut records = 0u64;
    let mut key = Vec::new();

    while offset + HEADER_LEN as u64 <= file_len {
        let mut header = [0u8; HEADER_LEN];
        if file.read_exact_at(&mut header, offset).is_err() {
            break;
        }
        let (klen, vlen) = decode_header(&header);

        if klen == 0
            || klen as usize > max_key
            || klen as usize > HARD_KEY_MAX
            || vlen as usize > max_value
            || vlen as usize > HARD_VALUE_MAX
        {
            break;
        }
        if offset + record_len(klen, vlen) > file_len {
            break;
        }

        key.resize(klen as usize, 0);
        if file.read_exact_at(&mut key, offset + HEADER_LEN as u64).is_err() {
            break;
        }

        // Probe the value's final byte: if it reads, the whole record is on
        // disk (the length check above already bounded it).
        if vlen > 0 {
            let probe_at = offset + record_len(klen, vlen) - 1;
            let mut probe = [0u8; 1];
            if file.read_exact_at(&mut probe, probe_at).is_err() {
                break;
            }
        }

        let loc = Locator { offset, len: vlen };
        index.put(&key, loc)?;
        fast.insert(&key, loc);

        offset += record_len(klen, vlen);
        records += 1;
    }

    let last_good_end = offset;
    let mut truncated = false;
    if truncate && last_good_end < file_len {
        warn!(
            last_good_end,
            file_len, "truncating torn tail discovered during rebuild"
        );
        file.set_len(last_good_end)?;
        truncated = true;
    }

    debug!(records, last_good_end, truncated, "rebuild finished");
    Ok(RebuildOutcome {
        records,
        last_good_end,
        truncated,
    })
}

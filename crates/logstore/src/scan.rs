//! Integrity scan: cross-check every ordered-map entry against the file.
//!
//! Pruning candidates are buffered during the read iteration and deleted in
//! follow-up transactions, so the map's iterator never observes concurrent
//! mutation. Pruned keys leave the fast-index as well.

use crate::error::StoreError;
use crate::fastindex::FastIndex;
use crate::index::LocatorIndex;
use crate::record::{decode_header, record_len, Locator, HEADER_LEN};
use std::fs::File;
use std::ops::ControlFlow;
use std::os::unix::fs::FileExt;
use tracing::{debug, warn};

/// Aggregate result of one integrity scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Index entries visited.
    pub scanned: u64,
    /// Entries whose on-disk record checked out completely.
    pub valid: u64,
    /// Entries removed from both indexes.
    pub pruned: u64,
    /// Failed entries left in place (prune not requested).
    pub errors: u64,
}

pub(crate) fn integrity_scan(
    file: &File,
    index: &LocatorIndex,
    fast: &FastIndex,
    prune: bool,
) -> Result<ScanStats, StoreError> {
    let eof = file.metadata()?.len();
    let mut stats = ScanStats::default();
    let mut condemned: Vec<Vec<u8>> = Vec::new();

    index.for_each(|key, raw| {
        stats.scanned += 1;
        if entry_checks_out(file, eof, key, raw) {
            stats.valid += 1;
        } else if prune {
            condemned.push(key.to_vec());
        } else {
            stats.errors += 1;
        }
        ControlFlow::Continue(())
    })?;

    for key in condemned {
        if index.delete(&key)? {
            fast.remove(&key);
            stats.pruned += 1;
        }
    }

    if stats.pruned > 0 || stats.errors > 0 {
        warn!(
            scanned = stats.scanned,
            pruned = stats.pruned,
            errors = stats.errors,
            "integrity scan found stale index entries"
        );
    } else {
        debug!(scanned = stats.scanned, "integrity scan clean");
    }
    Ok(stats)
}

/// All checks an entry must pass: well-formed locator, record inside the
/// file, on-disk lengths and key bytes matching the index. Read failures
/// count as a failed check.
fn entry_checks_out(file: &File, eof: u64, key: &[u8], raw: &[u8]) -> bool {
    let Some(loc) = Locator::from_bytes(raw) else {
        return false;
    };
    if loc.offset + HEADER_LEN as u64 > eof {
        return false;
    }

    let mut header = [0u8; HEADER_LEN];
    if file.read_exact_at(&mut header, loc.offset).is_err() {
        return false;
    }
    let (klen, vlen) = decode_header(&header);
    if klen as usize != key.len() || loc.offset + record_len(klen, vlen) > eof {
        return false;
    }

    let mut disk_key = vec![0u8; klen as usize];
    if file
        .read_exact_at(&mut disk_key, loc.offset + HEADER_LEN as u64)
        .is_err()
    {
        return false;
    }
    if disk_key != key {
        return false;
    }

    vlen == loc.len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_header;
    use std::io::Write;

    fn setup() -> (tempfile::TempDir, File, LocatorIndex, FastIndex) {
        let dir = tempfile::tempdir().unwrap();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join("aof.log"))
            .unwrap();
        let index = LocatorIndex::open(dir.path(), "idx", 10 * 1024 * 1024).unwrap();
        (dir, file, index, FastIndex::new())
    }

    fn append_indexed(
        file: &mut File,
        index: &LocatorIndex,
        fast: &FastIndex,
        key: &[u8],
        value: &[u8],
    ) {
        let offset = file.metadata().unwrap().len();
        file.write_all(&encode_header(key.len() as u32, value.len() as u32))
            .unwrap();
        file.write_all(key).unwrap();
        file.write_all(value).unwrap();
        let loc = Locator {
            offset,
            len: value.len() as u32,
        };
        index.put(key, loc).unwrap();
        fast.insert(key, loc);
    }

    #[test]
    fn test_clean_store_scans_clean() {
        let (_dir, mut file, index, fast) = setup();
        append_indexed(&mut file, &index, &fast, b"a", b"1");
        append_indexed(&mut file, &index, &fast, b"b", b"22");

        let stats = integrity_scan(&file, &index, &fast, false).unwrap();
        assert_eq!(
            stats,
            ScanStats {
                scanned: 2,
                valid: 2,
                pruned: 0,
                errors: 0
            }
        );
    }

    #[test]
    fn test_entry_past_eof_counts_as_error() {
        let (_dir, mut file, index, fast) = setup();
        append_indexed(&mut file, &index, &fast, b"ok", b"val");
        index
            .put(
                b"stale",
                Locator {
                    offset: 5 * 1024 * 1024,
                    len: 55,
                },
            )
            .unwrap();

        let stats = integrity_scan(&file, &index, &fast, false).unwrap();
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.valid, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.pruned, 0);
        // Without prune, the entry stays.
        assert!(index.get(b"stale").unwrap().is_some());
    }

    #[test]
    fn test_prune_removes_from_both_indexes() {
        let (_dir, mut file, index, fast) = setup();
        append_indexed(&mut file, &index, &fast, b"ok", b"val");
        let stale = Locator {
            offset: 5 * 1024 * 1024,
            len: 55,
        };
        index.put(b"stale", stale).unwrap();
        fast.insert(b"stale", stale);

        let stats = integrity_scan(&file, &index, &fast, true).unwrap();
        assert_eq!(stats.pruned, 1);
        assert_eq!(stats.valid, 1);
        assert!(index.get(b"stale").unwrap().is_none());
        assert_eq!(fast.get(b"stale"), None);
    }

    #[test]
    fn test_length_mismatch_detected() {
        let (_dir, mut file, index, fast) = setup();
        append_indexed(&mut file, &index, &fast, b"k", b"value");
        // Corrupt the indexed length.
        index.put(b"k", Locator { offset: 0, len: 99 }).unwrap();

        let stats = integrity_scan(&file, &index, &fast, false).unwrap();
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_key_mismatch_detected() {
        let (_dir, mut file, index, fast) = setup();
        append_indexed(&mut file, &index, &fast, b"abc", b"v");
        // Same lengths, different key bytes.
        index.put(b"abd", Locator { offset: 0, len: 1 }).unwrap();

        let stats = integrity_scan(&file, &index, &fast, false).unwrap();
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.valid, 1);
        assert_eq!(stats.errors, 1);
    }
}

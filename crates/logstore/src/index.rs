//! Durable locator index on the embedded ordered-map.
//!
//! The contract demanded of the map is small: open/close an environment and
//! a named bucket, last-writer-wins `put`, `get`, `delete`, and ordered
//! iteration with early stop, each call a single serializable transaction.
//! LMDB via `heed` satisfies all of it; its data and lock files live inside
//! the store directory at its discretion.

use crate::error::StoreError;
use crate::record::{Locator, LOCATOR_LEN};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::ops::ControlFlow;
use std::path::Path;
use tracing::debug;

pub(crate) struct LocatorIndex {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LocatorIndex {
    /// Opens (creating if needed) the environment in `dir` and the named
    /// bucket inside it. `map_size` of 0 keeps the library default.
    pub fn open(dir: &Path, bucket: &str, map_size: usize) -> Result<Self, StoreError> {
        let mut options = EnvOpenOptions::new();
        options.max_dbs(8);
        if map_size > 0 {
            options.map_size(map_size);
        }
        // SAFETY: the environment is opened once per store directory and the
        // store serializes all access to it through this handle.
        let env = unsafe { options.open(dir)? };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database::<Bytes, Bytes>(&mut wtxn, Some(bucket))?;
        wtxn.commit()?;

        Ok(Self { env, db })
    }

    /// Writes one locator. Last writer wins.
    pub fn put(&self, key: &[u8], loc: Locator) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, &loc.to_bytes())?;
        wtxn.commit()?;
        Ok(())
    }

    /// Looks up a locator. A present-but-malformed payload (not exactly 12
    /// bytes) reads as absent; the integrity scanner reports and prunes such
    /// entries.
    pub fn get(&self, key: &[u8]) -> Result<Option<Locator>, StoreError> {
        let rtxn = self.env.read_txn()?;
        match self.db.get(&rtxn, key)? {
            Some(raw) => {
                let loc = Locator::from_bytes(raw);
                if loc.is_none() {
                    debug!(
                        payload_len = raw.len(),
                        expected = LOCATOR_LEN,
                        "malformed locator payload treated as absent"
                    );
                }
                Ok(loc)
            }
            None => Ok(None),
        }
    }

    /// Deletes one entry; returns whether it existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn()?;
        let existed = self.db.delete(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(existed)
    }

    /// Ordered iteration under a read-consistent snapshot.
    ///
    /// The callback sees raw key and value bytes (the value may be
    /// malformed; callers validate). Returning `ControlFlow::Break` stops
    /// early.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    {
        let rtxn = self.env.read_txn()?;
        for entry in self.db.iter(&rtxn)? {
            let (key, value) = entry?;
            if let ControlFlow::Break(()) = f(key, value) {
                break;
            }
        }
        Ok(())
    }

    /// Number of entries (scan statistics and tests).
    pub fn len(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }
}

//! In-process hash index from key to locator.
//!
//! Sits in front of the ordered-map on the read path. Protected by a single
//! store-wide rw-lock: readers (`get`, debug lookup) take the read lock,
//! flush workers and the integrity scanner take the write lock. The lock is
//! never held across ordered-map or data-file I/O.

use crate::record::Locator;
use parking_lot::RwLock;
use std::collections::HashMap;

pub(crate) struct FastIndex {
    map: RwLock<HashMap<Box<[u8]>, Locator>>,
}

impl FastIndex {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Locator> {
        self.map.read().get(key).copied()
    }

    /// Last writer wins.
    pub fn insert(&self, key: &[u8], loc: Locator) {
        self.map.write().insert(key.into(), loc);
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        self.map.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let idx = FastIndex::new();
        assert_eq!(idx.get(b"k"), None);

        idx.insert(b"k", Locator { offset: 8, len: 3 });
        assert_eq!(idx.get(b"k"), Some(Locator { offset: 8, len: 3 }));
        assert_eq!(idx.len(), 1);

        assert!(idx.remove(b"k"));
        assert!(!idx.remove(b"k"));
        assert_eq!(idx.get(b"k"), None);
    }

    #[test]
    fn test_last_writer_wins() {
        let idx = FastIndex::new();
        idx.insert(b"k", Locator { offset: 0, len: 1 });
        idx.insert(b"k", Locator { offset: 64, len: 9 });
        assert_eq!(idx.get(b"k"), Some(Locator { offset: 64, len: 9 }));
        assert_eq!(idx.len(), 1);
    }
}

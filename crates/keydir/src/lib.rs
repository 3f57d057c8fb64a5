//! # Keydir — the in-memory index
//!
//! The sole authority for "which record is live". Maps each key to the
//! location of its newest record on disk. The keydir has no on-disk form of
//! its own; it is rebuilt from the segment files on open.
//!
//! All operations take `&self`: lookups share a read lock, mutations
//! serialize on the write lock. This is what lets the store serve reads
//! concurrently with its single writer.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Location and freshness of the live record for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeydirEntry {
    /// Id of the segment holding the record.
    pub segment_id: u64,
    /// Offset of the value bytes inside that segment.
    pub value_offset: u64,
    /// Length of the value in bytes.
    pub value_size: u32,
    /// Timestamp the record was written with.
    pub timestamp: u64,
}

/// Authoritative mapping from key to live-record location.
#[derive(Debug, Default)]
pub struct Keydir {
    map: RwLock<HashMap<Vec<u8>, KeydirEntry>>,
}

impl Keydir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional replace. Returns the previous entry if any.
    pub fn insert(&self, key: Vec<u8>, entry: KeydirEntry) -> Option<KeydirEntry> {
        self.map.write().insert(key, entry)
    }

    /// Looks up the live-record location for `key`.
    pub fn get(&self, key: &[u8]) -> Option<KeydirEntry> {
        self.map.read().get(key).copied()
    }

    /// Removes `key`. Returns the previous entry if any.
    pub fn remove(&self, key: &[u8]) -> Option<KeydirEntry> {
        self.map.write().remove(key)
    }

    /// Snapshot of the current keys, in arbitrary order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.map.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Folds `f` over every entry in arbitrary order.
    ///
    /// The read lock is held for the duration; `f` must not call back into
    /// this keydir.
    pub fn fold<A, F>(&self, seed: A, mut f: F) -> A
    where
        F: FnMut(A, &[u8], &KeydirEntry) -> A,
    {
        let map = self.map.read();
        let mut acc = seed;
        for (key, entry) in map.iter() {
            acc = f(acc, key, entry);
        }
        acc
    }

    /// Swings the entry for `key` to `new` only if it still points at
    /// `(old_segment_id, old_value_offset)`.
    ///
    /// Merge uses this to publish the relocated copy of a record: if a
    /// concurrent write replaced the entry in the meantime, the newer entry
    /// is left alone and the merged copy becomes garbage for the next merge.
    pub fn replace_if_at(
        &self,
        key: &[u8],
        old_segment_id: u64,
        old_value_offset: u64,
        new: KeydirEntry,
    ) -> bool {
        let mut map = self.map.write();
        match map.get_mut(key) {
            Some(e) if e.segment_id == old_segment_id && e.value_offset == old_value_offset => {
                *e = new;
                true
            }
            _ => false,
        }
    }
}

//! Read path: `get()`, `list_keys()`, and `fold()`.
//!
//! Reads never take the writer lock. A lookup costs one keydir probe plus
//! one positional read from the referenced segment.

use keydir::KeydirEntry;

use crate::{Error, Result, Store};

impl Store {
    /// Returns the value stored under `key`.
    ///
    /// The keydir is trusted: nothing is re-verified beyond a successful
    /// read of exactly `value_size` bytes (merge keeps index and files
    /// consistent).
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] if the key is absent, [`Error::Closed`] after
    /// close, or [`Error::Io`].
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_open()?;
        loop {
            let entry = self.keydir.get(key).ok_or(Error::KeyNotFound)?;
            // A merge can retire the segment between the index probe and the
            // read; the fresh probe then sees the relocated entry.
            if let Some(value) = self.read_entry(&entry)? {
                return Ok(value);
            }
        }
    }

    /// One positional read at the entry's location, or `None` if the segment
    /// has been retired by a merge since the entry was read.
    pub(crate) fn read_entry(&self, entry: &KeydirEntry) -> Result<Option<Vec<u8>>> {
        let Some(reader) = self.reader(entry.segment_id) else {
            return Ok(None);
        };
        Ok(Some(reader.read_value(entry.value_offset, entry.value_size)?))
    }

    /// Snapshot of all live keys, in arbitrary order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.check_open()?;
        Ok(self.keydir.keys())
    }

    /// Folds `f` over every live `(key, value)` pair, in arbitrary order.
    ///
    /// The key set is the one present when the fold starts; concurrent
    /// writes are not observed. Each value is fetched with a fresh
    /// positional read.
    pub fn fold<A, F>(&self, seed: A, mut f: F) -> Result<A>
    where
        F: FnMut(A, &[u8], &[u8]) -> A,
    {
        self.check_open()?;
        let pairs = self.keydir.fold(Vec::new(), |mut acc, key, entry| {
            acc.push((key.to_vec(), *entry));
            acc
        });

        let mut acc = seed;
        for (key, entry) in pairs {
            match self.read_entry(&entry)? {
                Some(value) => acc = f(acc, &key, &value),
                None => {
                    // The location was retired by a merge mid-fold; resolve
                    // through the keydir again. A key deleted in the
                    // meantime is skipped.
                    if let Some(current) = self.keydir.get(&key) {
                        if let Some(value) = self.read_entry(&current)? {
                            acc = f(acc, &key, &value);
                        }
                    }
                }
            }
        }
        Ok(acc)
    }
}

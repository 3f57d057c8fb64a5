//! Write path: `put()`, `delete()`, rollover, and write timestamps.
//!
//! All mutations flow through this module. Each write is appended to the
//! active segment first and only then published through the keydir, so a
//! failed append looks to callers like the write never happened.

use keydir::KeydirEntry;
use segment::{ActiveSegment, Appended, Record, SegmentReader};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result, Store, WriterState, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl WriterState {
    /// Millisecond timestamp, forced strictly above the previous one so that
    /// writes landing in the same millisecond stay ordered.
    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }
}

impl Store {
    /// Inserts or overwrites `key`.
    ///
    /// The record is on disk and indexed when this returns, but not
    /// guaranteed durable until [`sync`](Store::sync) unless the store was
    /// opened with `sync_on_put`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyKey`], [`Error::KeyTooLarge`], [`Error::ValueTooLarge`],
    /// [`Error::ReadOnly`], [`Error::Closed`], or [`Error::Io`]. After an
    /// I/O failure the keydir is untouched; any partial bytes on disk are
    /// discarded by the next recovery.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        validate_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(value.len()));
        }

        let mut ws = self.writer.lock();
        let timestamp = ws.next_timestamp();
        let record = Record::put(timestamp, key.to_vec(), value.to_vec());
        let (segment_id, appended) = self.append_record(&mut ws, &record)?;

        self.keydir.insert(
            key.to_vec(),
            KeydirEntry {
                segment_id,
                value_offset: appended.value_offset,
                value_size: value.len() as u32,
                timestamp,
            },
        );
        Ok(())
    }

    /// Deletes `key`.
    ///
    /// Writes a tombstone record iff the key exists, then removes it from
    /// the keydir; deleting an absent key is a validated no-op. Either way a
    /// subsequent `get` returns [`Error::KeyNotFound`] and the outcome
    /// survives recovery.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        validate_key(key)?;

        let mut ws = self.writer.lock();
        if self.keydir.get(key).is_none() {
            return Ok(());
        }

        let timestamp = ws.next_timestamp();
        let record = Record::tombstone(timestamp, key.to_vec());
        self.append_record(&mut ws, &record)?;
        self.keydir.remove(key);
        Ok(())
    }

    /// Appends to the active segment, rolling over first when the record
    /// would push a non-empty segment past the threshold. Returns the id of
    /// the segment the record landed in.
    fn append_record(&self, ws: &mut WriterState, record: &Record) -> Result<(u64, Appended)> {
        let record_len = record.encoded_len() as u64;
        let need_roll = match ws.active.as_ref() {
            // A record larger than the threshold still goes into a fresh,
            // empty segment, where it then sits alone.
            Some(active) => {
                active.size() > 0
                    && active.size() + record_len > self.opts.segment_threshold_bytes
            }
            // No active segment: a merge retired it, or a previous rollover
            // failed after sealing. Install the next one.
            None => true,
        };
        if need_roll {
            self.roll_segment(ws)?;
        }

        let active = ws.active.as_mut().ok_or(Error::ReadOnly)?;
        let appended = active.append(record)?;
        if self.opts.sync_on_put {
            active.sync()?;
        }
        Ok((active.id(), appended))
    }

    /// Seals the current active segment, if any, and installs a fresh one.
    fn roll_segment(&self, ws: &mut WriterState) -> Result<()> {
        if let Some(old) = ws.active.take() {
            old.seal()?;
        }
        self.install_segment(ws)
    }

    /// Creates the next active segment and registers its read handle.
    fn install_segment(&self, ws: &mut WriterState) -> Result<()> {
        let id = ws.next_segment_id;
        let active = ActiveSegment::create(&self.dir, id)?;
        self.readers
            .write()
            .insert(id, Arc::new(SegmentReader::open(&self.dir, id)?));
        ws.next_segment_id = id + 1;
        ws.active = Some(active);
        Ok(())
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::KeyTooLarge(key.len()));
    }
    Ok(())
}

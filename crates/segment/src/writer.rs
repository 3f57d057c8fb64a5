//! The append side of a segment.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::record::{Record, MAX_KEY_LEN, MAX_VALUE_LEN};

/// Offsets reported by a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Offset of the record's first byte (the CRC field).
    pub record_offset: u64,
    /// Offset of the record's first value byte; this is what the keydir stores.
    pub value_offset: u64,
    /// Total bytes written for the record.
    pub len: u64,
}

/// The unique writable segment of a store.
///
/// Records are encoded into a reusable scratch buffer and written with a
/// single `write_all` per append. The tracked size is updated only after the
/// write succeeds; a failed write rolls the file length back so the next
/// append lands at the tracked size.
pub struct ActiveSegment {
    id: u64,
    path: PathBuf,
    file: File,
    size: u64,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl ActiveSegment {
    /// Creates a fresh, empty segment file. Fails if the file already exists.
    pub fn create(dir: &Path, id: u64) -> io::Result<Self> {
        Self::create_at(id, crate::data_path(dir, id))
    }

    /// Creates a fresh segment file at an explicit path (merge writes its
    /// outputs under temporary names and renames them into place).
    pub fn create_at(id: u64, path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            id,
            path,
            file,
            size: 0,
            buf: Vec::with_capacity(256),
        })
    }

    /// Reopens an existing segment file to continue appending (recovery picks
    /// the highest segment back up as the active one).
    pub fn reopen(dir: &Path, id: u64) -> io::Result<Self> {
        let path = crate::data_path(dir, id);
        let file = OpenOptions::new().append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            id,
            path,
            file,
            size,
            buf: Vec::with_capacity(256),
        })
    }

    /// The segment id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Encodes `record` and appends it as a single write.
    pub fn append(&mut self, record: &Record) -> io::Result<Appended> {
        if record.key.is_empty() || record.key.len() > MAX_KEY_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "record key length out of range",
            ));
        }
        if let Some(v) = &record.value {
            if v.len() > MAX_VALUE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "record value too large",
                ));
            }
        }

        self.buf.clear();
        record.encode_into(&mut self.buf);

        if let Err(e) = self.file.write_all(&self.buf) {
            // A partial frame may have reached the file; roll it back so the
            // tracked size stays the real append position.
            let _ = self.file.set_len(self.size);
            return Err(e);
        }

        let record_offset = self.size;
        let len = self.buf.len() as u64;
        self.size += len;

        Ok(Appended {
            record_offset,
            value_offset: record_offset + record.value_offset_in_record() as u64,
            len,
        })
    }

    /// Flushes and asks the OS to persist the file to stable storage.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Syncs and closes the append handle, sealing the segment. Sealed
    /// segments are never written again.
    pub fn seal(mut self) -> io::Result<()> {
        self.sync()
    }
}

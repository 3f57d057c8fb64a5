//! Hint-file sidecars.
//!
//! A hint file pairs with a merge-produced segment and lists the location of
//! every record in it, so recovery can rebuild the index for that segment
//! without touching any value bytes.
//!
//! ```text
//! [timestamp: u64 BE][key_size: u16 BE][value_size: u32 BE][value_offset: u64 BE][key]
//! ```
//!
//! Hint entries never describe tombstones: merge drops tombstones, so every
//! record in the paired segment is live.

use byteorder::{BigEndian, ReadBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::record::{eof_as_corrupt, read_exact_or_eof, MAX_KEY_LEN, TOMBSTONE};
use crate::SegmentError;

/// Fixed entry header: timestamp(8) + key_size(2) + value_size(4) + value_offset(8).
pub const HINT_HEADER_LEN: usize = 22;

/// One live-record pointer in a hint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRecord {
    pub timestamp: u64,
    pub value_size: u32,
    /// Offset of the value bytes inside the paired data file.
    pub value_offset: u64,
    pub key: Vec<u8>,
}

/// Appends hint entries for a segment while merge writes it.
pub struct HintWriter {
    out: BufWriter<File>,
}

impl HintWriter {
    /// Creates a fresh hint file. Fails if the file already exists.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create_new(true).write(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Serializes `rec` and appends it.
    pub fn append(&mut self, rec: &HintRecord) -> io::Result<()> {
        debug_assert!(!rec.key.is_empty() && rec.key.len() <= MAX_KEY_LEN);

        self.out.write_all(&rec.timestamp.to_be_bytes())?;
        self.out.write_all(&(rec.key.len() as u16).to_be_bytes())?;
        self.out.write_all(&rec.value_size.to_be_bytes())?;
        self.out.write_all(&rec.value_offset.to_be_bytes())?;
        self.out.write_all(&rec.key)?;
        Ok(())
    }

    /// Flushes buffered entries and fsyncs the file.
    pub fn sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

/// Sequential reader over a hint file.
pub struct HintIter<R: Read> {
    rdr: BufReader<R>,
}

impl HintIter<File> {
    /// Opens a hint file for replay.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::from_reader(File::open(path)?))
    }
}

impl<R: Read> HintIter<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        Self {
            rdr: BufReader::new(reader),
        }
    }

    /// Reads the next entry.
    ///
    /// Returns `Ok(None)` at a clean end of file. A truncated or illegal
    /// entry (zero key size, tombstone sentinel) yields `Err(Corrupt)`;
    /// recovery then falls back to scanning the paired data file.
    pub fn next_record(&mut self) -> Result<Option<HintRecord>, SegmentError> {
        // Read the first field byte-by-byte so that end-of-input at an entry
        // boundary can be told apart from a torn field.
        let mut ts_buf = [0u8; 8];
        if !read_exact_or_eof(&mut self.rdr, &mut ts_buf)? {
            return Ok(None);
        }
        let timestamp = u64::from_be_bytes(ts_buf);
        let key_size = self.rdr.read_u16::<BigEndian>().map_err(eof_as_corrupt)? as usize;
        let value_size = self.rdr.read_u32::<BigEndian>().map_err(eof_as_corrupt)?;
        let value_offset = self.rdr.read_u64::<BigEndian>().map_err(eof_as_corrupt)?;

        if key_size == 0 || value_size == TOMBSTONE {
            return Err(SegmentError::Corrupt);
        }

        let mut key = vec![0u8; key_size];
        self.rdr.read_exact(&mut key).map_err(eof_as_corrupt)?;

        Ok(Some(HintRecord {
            timestamp,
            value_size,
            value_offset,
            key,
        }))
    }
}

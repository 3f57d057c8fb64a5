//! The read side of a segment: positional value reads and full scans.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::record::Record;
use crate::SegmentError;

/// Random-access reads against one segment file.
///
/// A persistent file handle is kept open for the lifetime of the reader,
/// wrapped in a `Mutex` so that reads go through a shared `&self` reference.
/// Each lookup costs one seek plus one exact read.
pub struct SegmentReader {
    id: u64,
    path: PathBuf,
    /// File size at open time. The active segment keeps growing past this;
    /// it is only meaningful for sealed segments.
    size: u64,
    file: Mutex<File>,
}

impl SegmentReader {
    /// Opens the data file for segment `id` read-only.
    pub fn open(dir: &Path, id: u64) -> io::Result<Self> {
        let path = crate::data_path(dir, id);
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            id,
            path,
            size,
            file: Mutex::new(file),
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

    /// File size observed at open time.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads exactly `value_size` bytes at `value_offset`.
    pub fn read_value(&self, value_offset: u64, value_size: u32) -> io::Result<Vec<u8>> {
        let mut value = vec![0u8; value_size as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(value_offset))?;
        file.read_exact(&mut value)?;
        drop(file);
        Ok(value)
    }
}

/// A record yielded by [`RecordIter`], with its location in the segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    pub record: Record,
    /// Offset of the record's first byte.
    pub record_offset: u64,
    /// Offset of the record's first value byte.
    pub value_offset: u64,
}

/// Lazy front-to-back scan over a segment's records.
///
/// The iterator is generic over any `Read` implementor, allowing it to be
/// used with real files or in-memory buffers for testing. It stops at the
/// end of the file or at the first corrupt record; after either, [`pos`]
/// reports the length of the valid prefix, which recovery uses to truncate
/// a torn tail.
///
/// [`pos`]: RecordIter::pos
pub struct RecordIter<R: Read> {
    rdr: BufReader<R>,
    pos: u64,
}

impl RecordIter<File> {
    /// Opens a segment file for scanning.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::from_reader(File::open(path)?))
    }
}

impl<R: Read> RecordIter<R> {
    /// Constructs a scanner from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        Self {
            rdr: BufReader::new(reader),
            pos: 0,
        }
    }

    /// Offset just past the last successfully decoded record.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Decodes the next record.
    ///
    /// Returns `Ok(None)` at a clean end of file and `Err(Corrupt)` at the
    /// first damaged record; iteration must not continue after either.
    pub fn next_record(&mut self) -> Result<Option<ScannedRecord>, SegmentError> {
        let record = match Record::decode_from(&mut self.rdr)? {
            Some(r) => r,
            None => return Ok(None),
        };
        let record_offset = self.pos;
        let value_offset = record_offset + record.value_offset_in_record() as u64;
        self.pos += record.encoded_len() as u64;
        Ok(Some(ScannedRecord {
            record,
            record_offset,
            value_offset,
        }))
    }
}

//! # Segment — append-only data files
//!
//! The on-disk substrate of the CaskKV store. A segment is an append-only
//! file of self-delimiting records; the store keeps exactly one **active**
//! segment open for appending, while every older segment is **sealed**
//! (immutable, read-only, a candidate for merge).
//!
//! ## Binary Record Format
//!
//! ```text
//! [crc32: u32 BE][timestamp: u64 BE][key_size: u16 BE][value_size: u32 BE][key][value]
//! ```
//!
//! The CRC covers everything after itself, in on-disk order. A `value_size`
//! of `0xFFFF_FFFF` marks a tombstone; tombstones carry no value bytes.
//! Records are self-delimiting, so a segment can be scanned front to back
//! with no external index.
//!
//! ## Hint Files
//!
//! A sealed segment produced by merge gets a `.hint` sidecar listing the
//! location of every record in it, so recovery can rebuild the index
//! without reading values. See [`HintRecord`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use segment::{ActiveSegment, Record, RecordIter, SegmentReader};
//!
//! let dir = std::path::Path::new("db");
//! let mut seg = ActiveSegment::create(dir, 0).unwrap();
//! let put = Record::put(1, b"hello".to_vec(), b"world".to_vec());
//! let at = seg.append(&put).unwrap();
//! seg.seal().unwrap();
//!
//! let reader = SegmentReader::open(dir, 0).unwrap();
//! assert_eq!(reader.read_value(at.value_offset, 5).unwrap(), b"world");
//!
//! let mut iter = RecordIter::open(&segment::data_path(dir, 0)).unwrap();
//! while let Some(scanned) = iter.next_record().unwrap() {
//!     println!("{:?}", scanned.record);
//! }
//! ```

mod hint;
mod reader;
mod record;
mod writer;

pub use hint::{HintIter, HintRecord, HintWriter, HINT_HEADER_LEN};
pub use reader::{RecordIter, ScannedRecord, SegmentReader};
pub use record::{Record, HEADER_LEN, MAX_KEY_LEN, MAX_VALUE_LEN, TOMBSTONE};
pub use writer::{ActiveSegment, Appended};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from record and hint decoding.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record failed CRC validation, carried an illegal field, or was cut
    /// short by end-of-file.
    #[error("corrupt record")]
    Corrupt,
}

/// File suffix for segment data files.
pub const DATA_EXT: &str = "data";
/// File suffix for hint sidecars.
pub const HINT_EXT: &str = "hint";

/// Path of the data file for segment `id` inside `dir`, e.g. `000000000000002a.data`.
pub fn data_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:016x}.{}", id, DATA_EXT))
}

/// Path of the hint sidecar for segment `id` inside `dir`.
pub fn hint_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:016x}.{}", id, HINT_EXT))
}

/// Parses a data-file name of the form `{16 hex digits}.data`.
///
/// Returns `None` for anything else; callers ignore such files.
pub fn parse_data_name(name: &str) -> Option<u64> {
    parse_id(name, DATA_EXT)
}

/// Parses a hint-file name of the form `{16 hex digits}.hint`.
pub fn parse_hint_name(name: &str) -> Option<u64> {
    parse_id(name, HINT_EXT)
}

fn parse_id(name: &str, ext: &str) -> Option<u64> {
    let stem = name.strip_suffix(ext).and_then(|s| s.strip_suffix('.'))?;
    if stem.len() != 16 || !stem.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}

#[cfg(test)]
mod tests;

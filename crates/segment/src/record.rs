//! The on-disk record codec.
//!
//! Pure encode/decode — no file handles, no clock. The write and scan paths
//! own the I/O.

use byteorder::{BigEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{self, Read};

use crate::SegmentError;

/// Fixed header size: crc(4) + timestamp(8) + key_size(2) + value_size(4).
pub const HEADER_LEN: usize = 18;

/// `value_size` sentinel marking a tombstone.
pub const TOMBSTONE: u32 = u32::MAX;

/// Largest encodable key. The key_size field is 16 bits; zero is illegal.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Largest encodable value. One value of the 32-bit size space is reserved
/// as the tombstone sentinel.
pub const MAX_VALUE_LEN: usize = (u32::MAX - 1) as usize;

/// A single decoded record. `value == None` signifies a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Store-assigned write time, milliseconds.
    pub timestamp: u64,
    /// The lookup key. Never empty in a well-formed record.
    pub key: Vec<u8>,
    /// The payload, or `None` for a tombstone.
    pub value: Option<Vec<u8>>,
}

impl Record {
    /// A key-value record.
    pub fn put(timestamp: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            timestamp,
            key,
            value: Some(value),
        }
    }

    /// A deletion marker for `key`.
    pub fn tombstone(timestamp: u64, key: Vec<u8>) -> Self {
        Self {
            timestamp,
            key,
            value: None,
        }
    }

    /// Whether this record denotes a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.key.len() + self.value.as_ref().map_or(0, Vec::len)
    }

    /// Byte distance from the record start to the first value byte.
    pub fn value_offset_in_record(&self) -> usize {
        HEADER_LEN + self.key.len()
    }

    /// Appends the encoded frame to `buf`.
    ///
    /// The CRC slot is reserved up front and back-patched once the rest of
    /// the frame is in place. The caller must have validated key and value
    /// lengths against [`MAX_KEY_LEN`] / [`MAX_VALUE_LEN`].
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        debug_assert!(!self.key.is_empty() && self.key.len() <= MAX_KEY_LEN);

        let start = buf.len();
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&(self.key.len() as u16).to_be_bytes());
        let value_size = match &self.value {
            Some(v) => {
                debug_assert!(v.len() <= MAX_VALUE_LEN);
                v.len() as u32
            }
            None => TOMBSTONE,
        };
        buf.extend_from_slice(&value_size.to_be_bytes());
        buf.extend_from_slice(&self.key);
        if let Some(v) = &self.value {
            buf.extend_from_slice(v);
        }

        let mut hasher = Crc32::new();
        hasher.update(&buf[start + 4..]);
        let crc = hasher.finalize();
        buf[start..start + 4].copy_from_slice(&crc.to_be_bytes());
    }

    /// Reads one record from `r`.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** at a record boundary -> `Ok(None)`.
    /// - **EOF mid-record** (incomplete last write) -> `Err(Corrupt)`.
    /// - **CRC mismatch** or `key_size == 0` -> `Err(Corrupt)`.
    /// - **I/O error** -> `Err(Io)`.
    pub fn decode_from<R: Read>(r: &mut R) -> Result<Option<Record>, SegmentError> {
        // The CRC field is read byte-by-byte so that end-of-input before the
        // first byte (a record boundary) can be told apart from a torn field.
        let mut crc_buf = [0u8; 4];
        if !read_exact_or_eof(r, &mut crc_buf)? {
            return Ok(None);
        }
        let crc = u32::from_be_bytes(crc_buf);

        let mut rest = [0u8; HEADER_LEN - 4];
        r.read_exact(&mut rest).map_err(eof_as_corrupt)?;

        let mut hdr = &rest[..];
        let timestamp = hdr.read_u64::<BigEndian>()?;
        let key_size = hdr.read_u16::<BigEndian>()? as usize;
        let value_size = hdr.read_u32::<BigEndian>()?;

        if key_size == 0 {
            return Err(SegmentError::Corrupt);
        }

        let mut key = vec![0u8; key_size];
        r.read_exact(&mut key).map_err(eof_as_corrupt)?;

        let mut hasher = Crc32::new();
        hasher.update(&rest);
        hasher.update(&key);

        let value = if value_size == TOMBSTONE {
            None
        } else {
            // Read through take() so a garbage size on a truncated file
            // surfaces as Corrupt instead of a giant upfront allocation.
            let mut value = Vec::new();
            r.by_ref()
                .take(u64::from(value_size))
                .read_to_end(&mut value)?;
            if value.len() != value_size as usize {
                return Err(SegmentError::Corrupt);
            }
            hasher.update(&value);
            Some(value)
        };

        if hasher.finalize() != crc {
            return Err(SegmentError::Corrupt);
        }

        Ok(Some(Record {
            timestamp,
            key,
            value,
        }))
    }
}

/// Mid-record EOF is an incomplete last write, which recovery treats as
/// corruption; everything else stays an I/O error.
pub(crate) fn eof_as_corrupt(e: io::Error) -> SegmentError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SegmentError::Corrupt
    } else {
        SegmentError::Io(e)
    }
}

/// Fills `buf` from `r`.
///
/// `Ok(true)` when the buffer was filled, `Ok(false)` when the input ended
/// before the first byte, `Err(Corrupt)` when it ended partway through.
pub(crate) fn read_exact_or_eof<R: Read>(
    r: &mut R,
    buf: &mut [u8],
) -> Result<bool, SegmentError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SegmentError::Io(e)),
        }
    }
    if filled == 0 {
        Ok(false)
    } else if filled < buf.len() {
        Err(SegmentError::Corrupt)
    } else {
        Ok(true)
    }
}

//! Configuration options for opening a store.

use crate::{Error, Result};

/// Default active-segment rollover threshold (128 MiB).
pub const DEFAULT_SEGMENT_THRESHOLD: u64 = 128 * 1024 * 1024;

/// Smallest accepted rollover threshold (1 KiB).
pub const MIN_SEGMENT_THRESHOLD: u64 = 1024;

/// Default number of sealed segments below which `merge` is a no-op.
pub const DEFAULT_MERGE_MIN_SEGMENTS: usize = 2;

/// Options recognized by [`Store::open`](crate::Store::open).
#[derive(Debug, Clone)]
pub struct Options {
    /// A record is appended to the active segment only while
    /// `current_size + record_size` stays within this many bytes; otherwise
    /// the segment is sealed first.
    /// Default: 128 MiB. Minimum: 1 KiB.
    pub segment_threshold_bytes: u64,

    /// Fsync the active segment before every `put` returns.
    /// Default: false (durability is established by explicit `sync` calls).
    pub sync_on_put: bool,

    /// Open without creating any files and reject `put`/`delete`/`merge`.
    /// Default: false.
    pub read_only: bool,

    /// `merge` does no work unless at least this many sealed segments exist.
    /// Default: 2.
    pub merge_min_segments: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            segment_threshold_bytes: DEFAULT_SEGMENT_THRESHOLD,
            sync_on_put: false,
            read_only: false,
            merge_min_segments: DEFAULT_MERGE_MIN_SEGMENTS,
        }
    }
}

impl Options {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active-segment rollover threshold.
    pub fn segment_threshold_bytes(mut self, bytes: u64) -> Self {
        self.segment_threshold_bytes = bytes;
        self
    }

    /// Sets whether every `put` fsyncs before returning.
    pub fn sync_on_put(mut self, value: bool) -> Self {
        self.sync_on_put = value;
        self
    }

    /// Sets read-only mode.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the sealed-segment count below which merge is a no-op.
    pub fn merge_min_segments(mut self, count: usize) -> Self {
        self.merge_min_segments = count;
        self
    }

    /// Validates the options; called by `open`.
    pub fn validate(&self) -> Result<()> {
        if self.segment_threshold_bytes < MIN_SEGMENT_THRESHOLD {
            return Err(Error::InvalidOptions(
                "segment_threshold_bytes is below the 1 KiB minimum",
            ));
        }
        if self.merge_min_segments == 0 {
            return Err(Error::InvalidOptions(
                "merge_min_segments must be at least 1",
            ));
        }
        Ok(())
    }
}

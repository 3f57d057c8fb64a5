//! # Engine — CaskKV store engine
//!
//! The central orchestrator tying the [`segment`] and [`keydir`] crates into
//! a complete Bitcask-style key-value store: an append-only, segmented data
//! log indexed by an in-memory hash table.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                     STORE                        │
//! │                                                  │
//! │ write.rs → active segment append → keydir insert │
//! │              |                                   │
//! │              |  (threshold exceeded?)            │
//! │              |            yes                    │
//! │              v                                   │
//! │           seal → fresh active segment            │
//! │                                                  │
//! │ read.rs  → keydir lookup → one positional read   │
//! │                                                  │
//! │ merge.rs → rewrite sealed segments, live         │
//! │            records only, emit hint files         │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                                  |
//! |---------------|----------------------------------------------------------|
//! | [`lib.rs`]    | `Store` struct, open/close/sync, accessors, `Debug`, `Drop` |
//! | [`recovery`]  | segment discovery, keydir reconstruction, tail truncation |
//! | [`write`]     | `put()`, `delete()`, rollover, write timestamps          |
//! | [`read`]      | `get()`, `list_keys()`, `fold()`                         |
//! | [`merge`]     | compaction with hint-file handoff                        |
//!
//! ## Crash Safety
//!
//! Every record is appended to the active segment **before** the keydir
//! update, so a failed write never surfaces through the index. Sealed
//! segments are fsynced once at seal time and never rewritten. Merge outputs
//! are fsynced and renamed into place before the keydir swings to them, and
//! recovery replays segments in ascending id order, so the newest record for
//! a key always wins after a crash at any point.
//!
//! ## Concurrency
//!
//! One writer, many readers. `put`/`delete` serialize on an internal writer
//! mutex; `get`/`list_keys`/`fold` run concurrently with them against the
//! lock-protected keydir and long-lived segment read handles. `merge` runs
//! while writers continue appending to a fresh active segment.

mod config;
mod error;
mod merge;
mod read;
mod recovery;
mod write;

pub use config::{
    Options, DEFAULT_MERGE_MIN_SEGMENTS, DEFAULT_SEGMENT_THRESHOLD, MIN_SEGMENT_THRESHOLD,
};
pub use error::{Error, Result};

use fs2::FileExt;
use keydir::Keydir;
use parking_lot::{Mutex, RwLock};
use segment::{ActiveSegment, SegmentReader};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Maximum allowed key size (the record's key_size field is 16 bits).
pub const MAX_KEY_SIZE: usize = segment::MAX_KEY_LEN;

/// Maximum allowed value size (one 32-bit length is reserved as the
/// tombstone sentinel).
pub const MAX_VALUE_SIZE: usize = segment::MAX_VALUE_LEN;

/// Name of the advisory lock file inside a store directory.
pub const LOCK_FILE: &str = ".lock";

/// A Bitcask-style persistent key-value store.
///
/// # Write Path
///
/// 1. Assign a timestamp `max(now_ms, last + 1)`.
/// 2. Append the encoded record to the active segment, sealing it and
///    starting a fresh one first if the append would cross the threshold.
/// 3. Point the keydir entry at the new value location.
///
/// # Read Path
///
/// 1. Keydir lookup — the single source of truth for liveness.
/// 2. One positional read of exactly `value_size` bytes.
///
/// # Thread Safety
///
/// All operations take `&self`; share the store across threads with
/// `Arc<Store>`. Reads proceed concurrently with the single writer.
pub struct Store {
    dir: PathBuf,
    opts: Options,
    keydir: Keydir,
    /// Read handles for every segment (active included), by id. Merge swaps
    /// entries in and out; in-flight reads keep retired segments alive
    /// through their `Arc`.
    readers: RwLock<HashMap<u64, Arc<SegmentReader>>>,
    writer: Mutex<WriterState>,
    /// Serializes whole merge runs without blocking writers.
    merge_lock: Mutex<()>,
    closed: AtomicBool,
}

pub(crate) struct WriterState {
    /// Append side of the active segment; `None` in read-only mode.
    pub(crate) active: Option<ActiveSegment>,
    /// Last write timestamp handed out.
    pub(crate) last_timestamp: u64,
    /// Next unassigned segment id; rollover and merge draw from the same
    /// counter, so ids stay strictly monotonic within the directory.
    pub(crate) next_segment_id: u64,
    /// Held for the lifetime of the store; dropping it releases the
    /// directory lock.
    pub(crate) lock_file: Option<File>,
}

impl Store {
    /// Opens the store at `dir`, creating the directory if absent.
    ///
    /// Acquires an exclusive advisory lock on the `.lock` file, then rebuilds
    /// the keydir from the segment files and installs the active segment.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyOpen`] if another instance holds the lock.
    /// - [`Error::CorruptStore`] if a sealed segment other than the newest
    ///   one is damaged.
    /// - [`Error::InvalidOptions`] if `opts` is out of range.
    /// - [`Error::Io`] for anything else.
    pub fn open<P: AsRef<Path>>(dir: P, opts: Options) -> Result<Self> {
        opts.validate()?;
        let dir = dir.as_ref().to_path_buf();

        if !opts.read_only {
            std::fs::create_dir_all(&dir)?;
        }
        let lock_file = Self::acquire_dir_lock(&dir, opts.read_only)?;

        let recovered = recovery::recover(&dir, &opts)?;

        Ok(Self {
            dir,
            opts,
            keydir: recovered.keydir,
            readers: RwLock::new(recovered.readers),
            writer: Mutex::new(WriterState {
                active: recovered.active,
                last_timestamp: recovered.last_timestamp,
                next_segment_id: recovered.next_segment_id,
                lock_file,
            }),
            merge_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    fn acquire_dir_lock(dir: &Path, read_only: bool) -> Result<Option<File>> {
        let path = dir.join(LOCK_FILE);
        if read_only {
            // Nothing is created in read-only mode; an absent lock file just
            // means no writer has ever touched the directory.
            if !path.exists() {
                return Ok(None);
            }
            let file = OpenOptions::new().read(true).open(&path)?;
            file.try_lock_shared().map_err(|_| Error::AlreadyOpen)?;
            Ok(Some(file))
        } else {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)?;
            file.try_lock_exclusive().map_err(|_| Error::AlreadyOpen)?;
            Ok(Some(file))
        }
    }

    /// The store directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// The options the store was opened with.
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.keydir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keydir.is_empty()
    }

    /// Number of open segments, active included.
    pub fn segment_count(&self) -> usize {
        self.readers.read().len()
    }

    /// Id of the segment currently accepting appends.
    ///
    /// `None` in read-only mode, and between a merge and the next write —
    /// merge retires the active segment, and its replacement is installed
    /// lazily by the first append that needs it.
    pub fn active_segment_id(&self) -> Option<u64> {
        self.writer.lock().active.as_ref().map(ActiveSegment::id)
    }

    /// The last write timestamp handed out.
    pub fn last_timestamp(&self) -> u64 {
        self.writer.lock().last_timestamp
    }

    /// Flushes the active segment to stable storage.
    ///
    /// This is the durability point: every write whose keydir update
    /// happened before this call survives a crash. Sealed segments need no
    /// syncing — they were fsynced once when sealed and are immutable.
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        let mut ws = self.writer.lock();
        if let Some(active) = ws.active.as_mut() {
            active.sync()?;
        }
        Ok(())
    }

    /// Syncs the active segment, releases every file handle, and releases
    /// the directory lock last. Idempotent; subsequent operations fail with
    /// [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut ws = self.writer.lock();
        let sync_result = match ws.active.take() {
            Some(mut active) => active.sync(),
            None => Ok(()),
        };
        self.readers.write().clear();
        let lock_file = ws.lock_file.take();
        drop(ws);
        drop(lock_file);

        sync_result?;
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.opts.read_only {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub(crate) fn reader(&self, id: u64) -> Option<Arc<SegmentReader>> {
        self.readers.read().get(&id).cloned()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("read_only", &self.opts.read_only)
            .field("segment_threshold_bytes", &self.opts.segment_threshold_bytes)
            .field("keys", &self.keydir.len())
            .field("segments", &self.readers.read().len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Best-effort close on drop.
///
/// Errors are swallowed because `Drop` cannot propagate them; everything
/// already appended is still recoverable from the segment files.
impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;

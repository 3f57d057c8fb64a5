//! Cold-start recovery: segment discovery and keydir reconstruction.
//!
//! Segments replay in ascending id order, and records within a segment in
//! ascending offset order, so later writes naturally overwrite earlier ones
//! in the keydir. Timestamps play no part in recovery ordering.

use keydir::{Keydir, KeydirEntry};
use segment::{ActiveSegment, HintIter, RecordIter, SegmentError, SegmentReader};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::{Error, Options, Result};

pub(crate) struct Recovered {
    pub keydir: Keydir,
    pub readers: HashMap<u64, Arc<SegmentReader>>,
    pub active: Option<ActiveSegment>,
    pub last_timestamp: u64,
    pub next_segment_id: u64,
}

#[derive(Default)]
struct Discovered {
    data: bool,
    hint: bool,
}

pub(crate) fn recover(dir: &Path, opts: &Options) -> Result<Recovered> {
    if !opts.read_only {
        cleanup_tmp_files(dir);
    }

    let discovered = discover(dir)?;
    let highest = discovered
        .iter()
        .rev()
        .find(|(_, d)| d.data)
        .map(|(id, _)| *id);

    let keydir = Keydir::new();
    let mut readers = HashMap::new();
    let mut last_timestamp = 0u64;

    for (&id, found) in &discovered {
        if !found.data {
            log::warn!("ignoring orphan hint file for segment {:016x}", id);
            continue;
        }

        // The highest segment is always scanned even when a hint exists:
        // the scan establishes the valid tail length and the append point.
        let mut replayed = false;
        if found.hint && Some(id) != highest {
            match replay_hint(dir, id) {
                Ok(entries) => {
                    for (key, entry) in entries {
                        last_timestamp = last_timestamp.max(entry.timestamp);
                        keydir.insert(key, entry);
                    }
                    replayed = true;
                }
                Err(e) => {
                    log::warn!(
                        "hint file for segment {:016x} unreadable ({}); scanning the segment",
                        id,
                        e
                    );
                }
            }
        }
        if !replayed {
            scan_segment(
                dir,
                id,
                Some(id) == highest,
                opts,
                &keydir,
                &mut last_timestamp,
            )?;
        }

        readers.insert(id, Arc::new(SegmentReader::open(dir, id)?));
    }

    let (active, next_segment_id) = if opts.read_only {
        (None, highest.map_or(0, |id| id + 1))
    } else {
        select_active(dir, highest, opts, &mut readers)?
    };

    Ok(Recovered {
        keydir,
        readers,
        active,
        last_timestamp,
        next_segment_id,
    })
}

/// Classifies directory entries by segment id. Files that are neither
/// `{16 hex}.data` nor `{16 hex}.hint` are ignored.
fn discover(dir: &Path) -> Result<BTreeMap<u64, Discovered>> {
    let mut discovered: BTreeMap<u64, Discovered> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = segment::parse_data_name(name) {
            discovered.entry(id).or_default().data = true;
        } else if let Some(id) = segment::parse_hint_name(name) {
            discovered.entry(id).or_default().hint = true;
        }
    }
    Ok(discovered)
}

/// Replays a hint file into a staging list.
///
/// Entries are only applied to the keydir once the whole file has replayed
/// cleanly, so a damaged hint cannot leave bogus locations behind before the
/// fallback scan runs.
fn replay_hint(
    dir: &Path,
    id: u64,
) -> std::result::Result<Vec<(Vec<u8>, KeydirEntry)>, SegmentError> {
    let mut iter = HintIter::open(&segment::hint_path(dir, id))?;
    let mut entries = Vec::new();
    while let Some(hint) = iter.next_record()? {
        entries.push((
            hint.key,
            KeydirEntry {
                segment_id: id,
                value_offset: hint.value_offset,
                value_size: hint.value_size,
                timestamp: hint.timestamp,
            },
        ));
    }
    Ok(entries)
}

/// Full scan of one segment: inserts live records, removes tombstoned keys.
///
/// A damaged record stops the scan. On the highest segment it is treated as
/// an incomplete last write: the file is truncated back to the valid prefix
/// and recovery continues. On any earlier segment it is fatal, because a
/// sealed intermediate segment must be complete.
fn scan_segment(
    dir: &Path,
    id: u64,
    is_highest: bool,
    opts: &Options,
    keydir: &Keydir,
    last_timestamp: &mut u64,
) -> Result<()> {
    let path = segment::data_path(dir, id);
    let mut iter = RecordIter::open(&path)?;
    loop {
        match iter.next_record() {
            Ok(Some(scanned)) => {
                let record = scanned.record;
                *last_timestamp = (*last_timestamp).max(record.timestamp);
                match record.value {
                    Some(value) => {
                        keydir.insert(
                            record.key,
                            KeydirEntry {
                                segment_id: id,
                                value_offset: scanned.value_offset,
                                value_size: value.len() as u32,
                                timestamp: record.timestamp,
                            },
                        );
                    }
                    None => {
                        keydir.remove(&record.key);
                    }
                }
            }
            Ok(None) => return Ok(()),
            Err(SegmentError::Io(e)) => return Err(Error::Io(e)),
            Err(SegmentError::Corrupt) => {
                let valid = iter.pos();
                if !is_highest {
                    return Err(Error::CorruptStore {
                        segment_id: id,
                        offset: valid,
                    });
                }
                log::warn!(
                    "segment {:016x} has a torn tail at offset {}; truncating",
                    id,
                    valid
                );
                if !opts.read_only {
                    drop(iter);
                    let file = OpenOptions::new().write(true).open(&path)?;
                    file.set_len(valid)?;
                    file.sync_all()?;
                    // any hint for this segment now covers bytes that are gone
                    let _ = std::fs::remove_file(segment::hint_path(dir, id));
                }
                return Ok(());
            }
        }
    }
}

/// Continues the highest segment as active when it is writable and within
/// the threshold; otherwise starts a fresh one with the next id.
///
/// A segment with a hint sidecar is a merge output and is permanently
/// sealed — appending to it would leave its hint covering only a prefix of
/// the records, so a fresh segment is started instead.
fn select_active(
    dir: &Path,
    highest: Option<u64>,
    opts: &Options,
    readers: &mut HashMap<u64, Arc<SegmentReader>>,
) -> Result<(Option<ActiveSegment>, u64)> {
    let fresh = |id: u64,
                 readers: &mut HashMap<u64, Arc<SegmentReader>>|
     -> Result<(Option<ActiveSegment>, u64)> {
        let active = ActiveSegment::create(dir, id)?;
        readers.insert(id, Arc::new(SegmentReader::open(dir, id)?));
        Ok((Some(active), id + 1))
    };

    match highest {
        None => fresh(0, readers),
        Some(id) => {
            let size = std::fs::metadata(segment::data_path(dir, id))?.len();
            if size >= opts.segment_threshold_bytes || segment::hint_path(dir, id).exists() {
                return fresh(id + 1, readers);
            }
            match ActiveSegment::reopen(dir, id) {
                Ok(active) => Ok((Some(active), id + 1)),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => fresh(id + 1, readers),
                Err(e) => Err(Error::Io(e)),
            }
        }
    }
}

/// Deletes leftover merge temporaries from an interrupted merge.
fn cleanup_tmp_files(dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".data.tmp") || name.ends_with(".hint.tmp") {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }
}

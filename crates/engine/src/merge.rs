//! Merge: rewrites sealed segments to contain only live records, reclaiming
//! the space held by overwritten values and tombstones.
//!
//! Three phases:
//!
//! 1. **Snapshot** (writer lock held): seal the active segment into the
//!    merge set and reserve one output id per input above it. The next
//!    write installs a fresh active segment above the reserved range, so
//!    concurrent writes land in ids strictly greater than every output id
//!    and ascending-id recovery can never resurrect a merged copy over a
//!    newer write.
//! 2. **Copy** (no locks): scan the inputs in ascending id order; a record
//!    is live iff the keydir still points at its exact location. Live
//!    records stream into `.data.tmp` outputs (rolling on the threshold)
//!    with a `.hint.tmp` entry each.
//! 3. **Publish**: fsync the outputs, rename them into place, expose their
//!    read handles, swing each keydir entry that still points at its
//!    pre-merge location, then drop the input readers and unlink the input
//!    files.
//!
//! A failure before publication discards the temporaries and leaves the
//! store exactly as it was. A crash at any point resolves on reopen:
//! leftover temporaries are deleted, and duplicate live records (input and
//! published output coexisting) are harmless because the higher-id copy
//! wins the replay.

use keydir::KeydirEntry;
use segment::{ActiveSegment, HintRecord, HintWriter, RecordIter, SegmentError, SegmentReader};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Result, Store};

/// One keydir swing recorded while copying: old location → new location.
struct PendingMove {
    key: Vec<u8>,
    old_segment_id: u64,
    old_value_offset: u64,
    new: KeydirEntry,
}

/// A merge output under construction, written under temporary names and
/// renamed into place at publication.
struct MergeOutput {
    id: u64,
    data: ActiveSegment,
    hint: HintWriter,
}

impl MergeOutput {
    fn create(dir: &Path, id: u64) -> Result<Self> {
        let data = ActiveSegment::create_at(id, data_tmp_path(dir, id))?;
        let hint = HintWriter::create(&hint_tmp_path(dir, id))?;
        Ok(Self { id, data, hint })
    }

    /// Fsyncs both files and closes the write handles.
    fn finish(self) -> Result<u64> {
        let MergeOutput { id, data, mut hint } = self;
        hint.sync()?;
        data.seal()?;
        Ok(id)
    }
}

impl Store {
    /// Compacts every sealed segment (the one sealed by this call included)
    /// into fresh segments holding only live records, each with a hint
    /// sidecar.
    ///
    /// No-op when fewer than `merge_min_segments` sealed segments exist.
    /// Writers keep appending to a fresh active segment for the whole run;
    /// a `put` racing the publication step simply wins, and the merged copy
    /// of its key becomes garbage for the next merge.
    ///
    /// # Errors
    ///
    /// [`Error::ReadOnly`], [`Error::Closed`], [`Error::CorruptStore`] if an
    /// input segment turns out damaged, or [`Error::Io`]. On error the
    /// store's contents are unchanged.
    pub fn merge(&self) -> Result<()> {
        self.check_writable()?;
        let _merging = self.merge_lock.lock();

        // Phase 1: snapshot the inputs and move the writer out of the way.
        // The next write installs a fresh active segment above the reserved
        // output range, so nothing written during or after the merge can be
        // shadowed by a merged copy on replay.
        let (victims, out_base) = {
            let mut ws = self.writer.lock();
            let active_id = ws.active.as_ref().map(ActiveSegment::id);
            let mut victims: Vec<u64> = self
                .readers
                .read()
                .keys()
                .copied()
                .filter(|id| Some(*id) != active_id)
                .collect();
            if victims.len() < self.opts.merge_min_segments {
                return Ok(());
            }

            if let Some(old) = ws.active.take() {
                victims.push(old.id());
                old.seal()?;
            }
            victims.sort_unstable();

            // One output id per input is always enough: live bytes per
            // input segment never exceed the threshold, so the copy rolls
            // over at most once per input.
            let out_base = ws.next_segment_id;
            ws.next_segment_id = out_base + victims.len() as u64;
            (victims, out_base)
        };

        // Phase 2: copy live records into temporary outputs.
        let (out_ids, moves) = match self.copy_live_records(&victims, out_base) {
            Ok(copied) => copied,
            Err(e) => {
                discard_tmp_outputs(&self.dir, out_base, victims.len() as u64);
                return Err(e);
            }
        };

        // Phase 3: publish.
        if let Err(e) = self.publish_outputs(&out_ids) {
            // Renamed outputs are complete and fsynced; leaving them behind
            // is safe because their copies replay after the still-present
            // inputs. Only the unrenamed temporaries are discarded.
            discard_tmp_outputs(&self.dir, out_base, victims.len() as u64);
            return Err(e);
        }

        let mut moved = 0usize;
        for m in &moves {
            if self
                .keydir
                .replace_if_at(&m.key, m.old_segment_id, m.old_value_offset, m.new)
            {
                moved += 1;
            }
        }

        {
            let mut readers = self.readers.write();
            for id in &victims {
                readers.remove(id);
            }
        }
        for &id in &victims {
            let _ = fs::remove_file(segment::data_path(&self.dir, id));
            let _ = fs::remove_file(segment::hint_path(&self.dir, id));
        }

        log::info!(
            "merge rewrote {} segments into {} ({} of {} live records swung)",
            victims.len(),
            out_ids.len(),
            moved,
            moves.len()
        );
        Ok(())
    }

    /// Scans the inputs in ascending id order and streams every live record
    /// into the temporary outputs, recording the keydir swing for each.
    fn copy_live_records(
        &self,
        victims: &[u64],
        out_base: u64,
    ) -> Result<(Vec<u64>, Vec<PendingMove>)> {
        let mut out_ids = Vec::new();
        let mut moves = Vec::new();
        let mut current: Option<MergeOutput> = None;
        let mut next_out = out_base;

        for &victim in victims {
            let path = segment::data_path(&self.dir, victim);
            let mut iter = RecordIter::open(&path)?;
            loop {
                let scanned = match iter.next_record() {
                    Ok(Some(scanned)) => scanned,
                    Ok(None) => break,
                    Err(SegmentError::Corrupt) => {
                        return Err(Error::CorruptStore {
                            segment_id: victim,
                            offset: iter.pos(),
                        });
                    }
                    Err(SegmentError::Io(e)) => return Err(Error::Io(e)),
                };

                let record = scanned.record;
                // Tombstones are never live: every record they could shadow
                // is itself part of this merge set.
                let value_size = match record.value.as_ref() {
                    Some(value) => value.len() as u32,
                    None => continue,
                };
                let live = matches!(
                    self.keydir.get(&record.key),
                    Some(e) if e.segment_id == victim && e.value_offset == scanned.value_offset
                );
                if !live {
                    continue;
                }

                let full = current.as_ref().map_or(false, |out| {
                    out.data.size() > 0
                        && out.data.size() + record.encoded_len() as u64
                            > self.opts.segment_threshold_bytes
                });
                if full {
                    if let Some(out) = current.take() {
                        out_ids.push(out.finish()?);
                    }
                }
                if current.is_none() {
                    current = Some(MergeOutput::create(&self.dir, next_out)?);
                    next_out += 1;
                }
                if let Some(out) = current.as_mut() {
                    let appended = out.data.append(&record)?;
                    out.hint.append(&HintRecord {
                        timestamp: record.timestamp,
                        value_size,
                        value_offset: appended.value_offset,
                        key: record.key.clone(),
                    })?;
                    moves.push(PendingMove {
                        old_segment_id: victim,
                        old_value_offset: scanned.value_offset,
                        new: KeydirEntry {
                            segment_id: out.id,
                            value_offset: appended.value_offset,
                            value_size,
                            timestamp: record.timestamp,
                        },
                        key: record.key,
                    });
                }
            }
        }

        if let Some(out) = current.take() {
            out_ids.push(out.finish()?);
        }
        Ok((out_ids, moves))
    }

    /// Renames the finished outputs into place and exposes their readers.
    /// Data before hint, so a crash in between leaves a segment that
    /// recovers by full scan rather than an orphan hint.
    fn publish_outputs(&self, out_ids: &[u64]) -> Result<()> {
        for &id in out_ids {
            fs::rename(data_tmp_path(&self.dir, id), segment::data_path(&self.dir, id))?;
            fs::rename(hint_tmp_path(&self.dir, id), segment::hint_path(&self.dir, id))?;
        }
        let mut readers = self.readers.write();
        for &id in out_ids {
            readers.insert(id, Arc::new(SegmentReader::open(&self.dir, id)?));
        }
        Ok(())
    }
}

fn data_tmp_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:016x}.data.tmp", id))
}

fn hint_tmp_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:016x}.hint.tmp", id))
}

fn discard_tmp_outputs(dir: &Path, out_base: u64, count: u64) {
    for id in out_base..out_base + count {
        let _ = fs::remove_file(data_tmp_path(dir, id));
        let _ = fs::remove_file(hint_tmp_path(dir, id));
    }
}

//! Write-ahead log for PulseStore
//!
//! A transaction reaches the WAL as one contiguous buffer: its records
//! followed by a `Commit` record. The write path is WAL-first; in-memory
//! state changes only after `append_batch` returns `Ok`.
//!
//! Segments are named `wal-<seq:016x>.pwal` so that lexicographic order is
//! replay order.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::format::{deserialize_entry, serialize_entry, Record, WalEntry, HEADER_SIZE, MAGIC_ARRAY};
use crate::platform_durability::durable_sync;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".pwal";

/// File name of segment `sequence`.
pub fn segment_name(sequence: u64) -> String {
    format!("{}{:016x}{}", SEGMENT_PREFIX, sequence, SEGMENT_SUFFIX)
}

/// Parse the sequence number out of a segment file name.
fn parse_segment_name(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// All segments in `wal_dir`, sorted by sequence.
pub fn list_segments(wal_dir: &Path) -> EngineResult<Vec<(u64, PathBuf)>> {
    let dir_entries = std::fs::read_dir(wal_dir)
        .map_err(|e| EngineError::io_at(wal_dir, &e, "Failed to read WAL directory"))?;

    let mut segments = Vec::new();
    for entry in dir_entries {
        let entry = entry.map_err(|e| EngineError::io_at(wal_dir, &e, "Failed to read directory entry"))?;
        let path = entry.path();
        if let Some(seq) = path.file_name().and_then(|n| n.to_str()).and_then(parse_segment_name) {
            segments.push((seq, path));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Appends transaction batches to the active segment.
///
/// The segment file is created by the first append, so opening and closing
/// an idle store leaves no empty segments behind.
pub struct WalWriter {
    file: Option<File>,
    path: PathBuf,
    /// Bytes of acknowledged batches in the active segment
    size: u64,
    wal_dir: PathBuf,
    sequence: u64,
    rotation_size: u64,
    sync_on_commit: bool,
    poisoned: bool,
}

/// Where an append stopped.
enum AppendFailure {
    Write(io::Error),
    Sync(io::Error),
}

impl WalWriter {
    /// Start a new segment after the highest existing one.
    ///
    /// Never appends to an old segment: a torn tail left by a crash would
    /// otherwise hide every batch written after it.
    pub fn new<P: AsRef<Path>>(wal_dir: P, rotation_size: u64, sync_on_commit: bool) -> EngineResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| EngineError::io_at(&wal_dir, &e, "Failed to create WAL directory"))?;

        let sequence = list_segments(&wal_dir)?.last().map(|(seq, _)| *seq + 1).unwrap_or(0);
        Ok(Self::starting_at(wal_dir, sequence, rotation_size, sync_on_commit))
    }

    /// A writer whose first append creates segment `sequence`. Touches no files.
    pub(crate) fn starting_at(wal_dir: PathBuf, sequence: u64, rotation_size: u64, sync_on_commit: bool) -> Self {
        Self {
            file: None,
            path: wal_dir.join(segment_name(sequence)),
            size: 0,
            wal_dir,
            sequence,
            rotation_size,
            sync_on_commit,
            poisoned: false,
        }
    }

    /// Append one committed batch.
    ///
    /// The whole batch is serialized before any byte is written, so an
    /// oversized record rejects the batch without touching the file. With
    /// `sync_on_commit` the call returns only after `durable_sync`.
    ///
    /// On failure the segment is cut back to the last acknowledged batch, so
    /// an `Err` batch never replays. A failed sync, or a cut that itself
    /// fails, poisons the writer: every later append is refused.
    pub fn append_batch(&mut self, records: &[Record]) -> EngineResult<()> {
        if self.poisoned {
            return Err(EngineError::JournalPoisoned { path: self.path.clone() });
        }

        let mut buffer = Vec::new();
        for record in records {
            buffer.extend_from_slice(&serialize_entry(record)?);
        }

        if self.size > 0 && self.size + buffer.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        let sync = self.sync_on_commit;
        match write_batch(self.active_file()?, &buffer, sync) {
            Ok(()) => {
                self.size += buffer.len() as u64;
                Ok(())
            }
            Err(failure) => Err(self.abandon_append(failure)),
        }
    }

    fn abandon_append(&mut self, failure: AppendFailure) -> EngineError {
        let (err, context, poison) = match failure {
            AppendFailure::Write(e) => (e, "WAL write failed", false),
            // after a failed fsync the page cache state is unknown
            AppendFailure::Sync(e) => (e, "WAL durable_sync failed", true),
        };
        let cut = self.discard_unacknowledged();
        if poison || !cut {
            self.poisoned = true;
            warn!(path = %self.path.display(), error = %err, "WAL writer poisoned");
        }
        EngineError::io_at(&self.path, &err, context)
    }

    /// Truncate the active segment to its acknowledged length.
    fn discard_unacknowledged(&mut self) -> bool {
        match &self.file {
            Some(file) => match file.set_len(self.size) {
                Ok(()) => true,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "failed to discard unacknowledged WAL bytes");
                    false
                }
            },
            None => true,
        }
    }

    fn active_file(&mut self) -> EngineResult<&mut File> {
        match &mut self.file {
            Some(file) => Ok(file),
            slot => Ok(slot.insert(open_append(&self.path)?)),
        }
    }

    /// Sync the current segment without writing anything.
    pub fn sync(&self) -> EngineResult<()> {
        match &self.file {
            Some(file) => durable_sync(file).map_err(|e| EngineError::io_at(&self.path, &e, "WAL sync failed")),
            None => Ok(()),
        }
    }

    /// Switch to a fresh segment, syncing the current one first.
    fn rotate(&mut self) -> EngineResult<()> {
        self.sync()?;

        self.sequence += 1;
        self.path = self.wal_dir.join(segment_name(self.sequence));
        self.file = None;
        self.size = 0;
        Ok(())
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn current_size(&self) -> u64 {
        self.size
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    pub fn rotation_size(&self) -> u64 {
        self.rotation_size
    }

    pub fn sync_on_commit(&self) -> bool {
        self.sync_on_commit
    }

    /// Whether a failed append left the segment in an unknown state.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) {
        self.file = Some(file);
    }
}

fn write_batch(file: &mut File, buffer: &[u8], sync: bool) -> Result<(), AppendFailure> {
    file.write_all(buffer).map_err(AppendFailure::Write)?;
    if sync {
        durable_sync(file).map_err(AppendFailure::Sync)?;
    }
    Ok(())
}

fn open_append(path: &Path) -> EngineResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::io_at(path, &e, "Failed to open WAL file"))
}

/// Reads raw records back out of the segments for replay.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    pub fn new<P: AsRef<Path>>(wal_dir: P) -> Self {
        Self { wal_dir: wal_dir.as_ref().to_path_buf() }
    }

    /// Every readable record, in segment order.
    ///
    /// Per segment: a bad magic or checksum resyncs on the next magic; a
    /// record running past EOF is a torn write and ends that segment.
    /// Batch validity is the caller's concern.
    pub fn recover_entries(&self) -> EngineResult<Vec<WalEntry>> {
        let mut all_entries = Vec::new();
        for (_, path) in list_segments(&self.wal_dir)? {
            all_entries.extend(self.recover_from_file(&path)?);
        }
        Ok(all_entries)
    }

    fn recover_from_file(&self, path: &Path) -> EngineResult<Vec<WalEntry>> {
        let mut file = File::open(path).map_err(|e| EngineError::io_at(path, &e, "Failed to open WAL file for recovery"))?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|e| EngineError::io_at(path, &e, "Failed to read WAL file"))?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset + HEADER_SIZE <= buffer.len() {
            if buffer[offset..offset + 4] != MAGIC_ARRAY {
                warn!(path = %path.display(), offset, "bad magic, scanning for next record");
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => { offset = next; continue; }
                    None => break,
                }
            }

            let length = u32::from_le_bytes([
                buffer[offset + 4], buffer[offset + 5],
                buffer[offset + 6], buffer[offset + 7],
            ]) as usize;
            let total = HEADER_SIZE + length;

            if offset + total > buffer.len() {
                warn!(
                    path = %path.display(),
                    offset,
                    needed = total,
                    available = buffer.len() - offset,
                    "torn write, stopping segment replay"
                );
                break;
            }

            match deserialize_entry(&buffer[offset..offset + total]) {
                Ok(entry) => {
                    entries.push(entry);
                    offset += total;
                }
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "corrupt record skipped");
                    match find_next_magic(&buffer, offset + 1) {
                        Some(next) => { offset = next; continue; }
                        None => break,
                    }
                }
            }
        }

        Ok(entries)
    }
}

/// Offset of the next magic at or after `start`.
fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    (start..buffer.len().saturating_sub(3)).find(|&i| buffer[i..i + 4] == MAGIC_ARRAY)
}

//! Compaction: rewrite the WAL as one checkpoint segment
//!
//! Overwrites, deletes and expired puts leave dead records in the WAL.
//! Compaction writes the live state as a single checkpoint batch into a new
//! segment and removes every older segment.
//!
//! Atomic rename pattern:
//! 1. Write the snapshot to `wal-{seq}.pwal.compact`
//! 2. durable_sync the temp file
//! 3. Rename it to `wal-{seq}.pwal` and move the writer to `seq + 1`
//! 4. Sync the directory, then delete older segments
//!
//! A crash before the rename leaves an orphaned temp file, removed on next
//! open. A crash after it replays old segments followed by the checkpoint,
//! which resets state, so the result is the same.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::format::{serialize_entry, Record};
use crate::platform_durability::{durable_sync, sync_directory};
use crate::wal::{list_segments, segment_name, WalWriter};

const TEMP_SUFFIX: &str = ".compact";

/// Result of a compaction.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// The checkpoint segment
    pub segment_path: PathBuf,
    /// Segments deleted after the checkpoint landed
    pub segments_removed: usize,
    pub records_before: u64,
    pub records_after: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl CompactionResult {
    /// Share of records that were dead (0.0 = none, 1.0 = all).
    pub fn dead_space_ratio(&self) -> f64 {
        if self.records_before == 0 {
            return 0.0;
        }
        self.records_before.saturating_sub(self.records_after) as f64 / self.records_before as f64
    }

    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Replace every segment in `writer`'s directory with `snapshot`.
///
/// `writer` moves to a fresh segment after the checkpoint as soon as the
/// checkpoint is installed; a later failure leaves it there.
/// The caller must hold the journal lock.
pub(crate) fn compact_wal(
    writer: &mut WalWriter,
    snapshot: &[Record],
    records_before: u64,
) -> EngineResult<CompactionResult> {
    writer.sync()?;
    let wal_dir = writer.wal_dir().to_path_buf();
    let old_segments = list_segments(&wal_dir)?;
    let bytes_before = old_segments
        .iter()
        .filter_map(|(_, path)| fs::metadata(path).ok())
        .map(|meta| meta.len())
        .sum();

    let mut buffer = Vec::new();
    for record in snapshot {
        buffer.extend_from_slice(&serialize_entry(record)?);
    }

    let segment_path = wal_dir.join(segment_name(writer.sequence() + 1));
    let temp_path = temp_path_for(&segment_path);
    write_temp_segment(&temp_path, &buffer)?;
    install_checkpoint(writer, &temp_path, &segment_path)?;
    sync_directory(&wal_dir)
        .map_err(|e| EngineError::io_at(&wal_dir, &e, "Failed to sync WAL directory"))?;

    let mut segments_removed = 0;
    for (_, path) in &old_segments {
        match fs::remove_file(path) {
            Ok(()) => segments_removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove compacted segment"),
        }
    }
    sync_directory(&wal_dir)
        .map_err(|e| EngineError::io_at(&wal_dir, &e, "Failed to sync WAL directory"))?;

    Ok(CompactionResult {
        segment_path,
        segments_removed,
        records_before,
        records_after: snapshot.len() as u64,
        bytes_before,
        bytes_after: buffer.len() as u64,
    })
}

fn write_temp_segment(temp_path: &Path, buffer: &[u8]) -> EngineResult<()> {
    let mut file = fs::File::create(temp_path)
        .map_err(|e| EngineError::io_at(temp_path, &e, "Failed to create compaction file"))?;
    file.write_all(buffer)
        .map_err(|e| EngineError::io_at(temp_path, &e, "Failed to write compaction file"))?;
    durable_sync(&file).map_err(|e| EngineError::io_at(temp_path, &e, "Failed to sync compaction file"))
}

/// Rename the checkpoint into place and move `writer` past it in one step.
///
/// Once the checkpoint is visible, any batch landing in an older segment
/// would replay before it and be wiped, so nothing fallible may sit
/// between the rename and the writer switch.
fn install_checkpoint(writer: &mut WalWriter, temp_path: &Path, segment_path: &Path) -> EngineResult<()> {
    let checkpoint_seq = writer.sequence() + 1;
    let next = WalWriter::starting_at(
        writer.wal_dir().to_path_buf(),
        checkpoint_seq + 1,
        writer.rotation_size(),
        writer.sync_on_commit(),
    );

    if let Err(e) = fs::rename(temp_path, segment_path) {
        if let Err(cleanup) = fs::remove_file(temp_path) {
            warn!(path = %temp_path.display(), error = %cleanup, "failed to remove compaction file");
        }
        return Err(EngineError::io_at(segment_path, &e, "Failed to install compacted segment"));
    }
    *writer = next;
    Ok(())
}

fn temp_path_for(segment: &Path) -> PathBuf {
    let mut name = segment.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Delete temp files left behind by an interrupted compaction.
pub(crate) fn remove_stale_temp_segments(wal_dir: &Path) -> EngineResult<()> {
    let entries = fs::read_dir(wal_dir)
        .map_err(|e| EngineError::io_at(wal_dir, &e, "Failed to read WAL directory"))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("wal-") && n.ends_with(TEMP_SUFFIX));
        if stale {
            debug!(path = %path.display(), "removing interrupted compaction file");
            fs::remove_file(&path)
                .map_err(|e| EngineError::io_at(&path, &e, "Failed to remove stale compaction file"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::NO_EXPIRY;
    use crate::wal::WalReader;
    use crate::{Config, Engine};
    use tempfile::TempDir;

    fn fill(writer: &mut WalWriter, rounds: u64) {
        for txn in 1..=rounds {
            writer
                .append_batch(&[
                    Record::put(txn, b"hot".to_vec(), txn.to_le_bytes().to_vec(), NO_EXPIRY),
                    Record::commit(txn, 1),
                ])
                .unwrap();
        }
    }

    #[test]
    fn test_compaction_replaces_segments() {
        let tmp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(tmp.path(), 64 * 1024, false).unwrap();
        fill(&mut writer, 50);

        let snapshot = vec![
            Record::checkpoint(99),
            Record::put(99, b"hot".to_vec(), 50u64.to_le_bytes().to_vec(), NO_EXPIRY),
            Record::commit(99, 2),
        ];
        let result = compact_wal(&mut writer, &snapshot, 100).unwrap();

        assert_eq!(result.segments_removed, 1);
        assert_eq!(result.records_after, 3);
        assert!(result.bytes_saved() > 0);
        assert!(result.dead_space_ratio() > 0.9);
        assert!(result.segment_path.exists());
        assert!(writer.sequence() > 1);

        let entries = WalReader::new(tmp.path()).recover_entries().unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_batches_after_installed_checkpoint_survive_replay() {
        let tmp = TempDir::new().unwrap();
        let wal_dir = tmp.path().join("wal");
        let mut writer = WalWriter::new(&wal_dir, 64 * 1024, false).unwrap();
        writer
            .append_batch(&[Record::put(1, b"a".to_vec(), b"1".to_vec(), NO_EXPIRY), Record::commit(1, 1)])
            .unwrap();

        // Stop right after the rename, as if the directory sync had failed
        let snapshot = [
            Record::checkpoint(2),
            Record::put(2, b"a".to_vec(), b"1".to_vec(), NO_EXPIRY),
            Record::commit(2, 2),
        ];
        let buffer: Vec<u8> = snapshot.iter().flat_map(|r| serialize_entry(r).unwrap()).collect();
        let segment_path = wal_dir.join(segment_name(writer.sequence() + 1));
        let temp_path = temp_path_for(&segment_path);
        write_temp_segment(&temp_path, &buffer).unwrap();
        install_checkpoint(&mut writer, &temp_path, &segment_path).unwrap();
        assert_eq!(writer.sequence(), 2);

        writer
            .append_batch(&[Record::put(3, b"b".to_vec(), b"2".to_vec(), NO_EXPIRY), Record::commit(3, 1)])
            .unwrap();
        drop(writer);

        let engine = Engine::open(tmp.path(), Config::ephemeral()).unwrap();
        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"a"), Some(b"1".as_slice()));
        assert_eq!(tx.get(b"b"), Some(b"2".as_slice()));
    }

    #[test]
    fn test_failed_install_keeps_writer() {
        let tmp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(tmp.path(), 64 * 1024, false).unwrap();
        fill(&mut writer, 1);

        let segment_path = tmp.path().join(segment_name(1));
        let missing = temp_path_for(&segment_path);
        assert!(install_checkpoint(&mut writer, &missing, &segment_path).is_err());
        assert_eq!(writer.sequence(), 0);
        assert!(!segment_path.exists());
    }

    #[test]
    fn test_stale_temp_files_removed() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp.path().join(format!("{}{}", segment_name(7), TEMP_SUFFIX));
        fs::write(&stale, b"half written").unwrap();
        fs::write(tmp.path().join("unrelated.txt"), b"keep").unwrap();

        remove_stale_temp_segments(tmp.path()).unwrap();
        assert!(!stale.exists());
        assert!(tmp.path().join("unrelated.txt").exists());
    }
}

//! Core storage engine: the heart of PulseStore.
//!
//! `Engine` keeps an ordered in-memory map of slots (value + expiry) backed
//! by a crash-safe WAL, plus a registry of prefix indexes.
//!
//! **Read path**: `begin_read` holds a shared lock for the transaction's
//! lifetime, so a reader sees one consistent snapshot.
//! **Write path**: `begin_write` takes the journal lock, which serializes
//! writers. Commit appends the batch to the WAL first, then applies it.
//! **Background**: the sweeper purges expired slots and compacts the WAL.
//!
//! Lock order is always journal, then state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::compaction::{compact_wal, remove_stale_temp_segments, CompactionResult};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::format::{Operation, Record, WalEntry, NO_EXPIRY};
use crate::index::{IndexDef, IndexRegistry};
use crate::sweeper::{start_sweeper, SweepStats, SweeperHandle};
use crate::tx::{ReadTx, WriteTx};
use crate::wal::{WalReader, WalWriter};

/// Wall clock in Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Absolute expiry for a write at `now` with an optional TTL.
pub(crate) fn expiry_after(now: u64, ttl: Option<Duration>) -> u64 {
    match ttl {
        None => NO_EXPIRY,
        Some(ttl) => now.saturating_add(ttl.as_millis() as u64).max(1),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) value: Vec<u8>,
    pub(crate) expires_at: u64,
}

impl Slot {
    pub(crate) fn is_live(&self, now: u64) -> bool {
        self.expires_at == NO_EXPIRY || self.expires_at > now
    }
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) entries: BTreeMap<Vec<u8>, Slot>,
    pub(crate) indexes: IndexRegistry,
}

impl State {
    pub(crate) fn get_live(&self, key: &[u8], now: u64) -> Option<&Slot> {
        self.entries.get(key).filter(|slot| slot.is_live(now))
    }

    /// Live slots under `prefix`, in key order.
    pub(crate) fn live_prefix<'s>(&'s self, prefix: &'s [u8], now: u64) -> impl Iterator<Item = (&'s Vec<u8>, &'s Slot)> + 's {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .filter(move |(_, slot)| slot.is_live(now))
    }

    pub(crate) fn apply_put(&mut self, key: Vec<u8>, slot: Slot) {
        self.indexes.on_put(&key);
        self.entries.insert(key, slot);
    }

    pub(crate) fn apply_delete(&mut self, key: &[u8]) {
        if self.entries.remove(key).is_some() {
            self.indexes.on_delete(key);
        }
    }

    fn purge_expired(&mut self, now: u64) -> usize {
        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, slot)| !slot.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.apply_delete(key);
        }
        expired.len()
    }

    fn live_count(&self, now: u64) -> usize {
        self.entries.values().filter(|slot| slot.is_live(now)).count()
    }

    /// The whole live state as one checkpoint batch.
    fn snapshot(&self, txn: u64, now: u64) -> Vec<Record> {
        let mut records = vec![Record::checkpoint(txn)];
        for def in self.indexes.definitions() {
            records.push(Record::declare_index(txn, &def.name, &def.prefix));
        }
        for (key, slot) in self.entries.iter().filter(|(_, slot)| slot.is_live(now)) {
            records.push(Record::put(txn, key.clone(), slot.value.clone(), slot.expires_at));
        }
        records.push(Record::commit(txn, records.len() as u32));
        records
    }
}

pub(crate) enum Journal {
    Disk { writer: WalWriter, records: u64 },
    Memory,
}

impl Journal {
    pub(crate) fn append(&mut self, batch: &[Record]) -> EngineResult<()> {
        match self {
            Journal::Disk { writer, records } => {
                writer.append_batch(batch)?;
                *records += batch.len() as u64;
                Ok(())
            }
            Journal::Memory => Ok(()),
        }
    }

    fn is_poisoned(&self) -> bool {
        matches!(self, Journal::Disk { writer, .. } if writer.is_poisoned())
    }

    fn sync(&self) -> EngineResult<()> {
        match self {
            Journal::Disk { writer, .. } => writer.sync(),
            Journal::Memory => Ok(()),
        }
    }

    fn records(&self) -> u64 {
        match self {
            Journal::Disk { records, .. } => *records,
            Journal::Memory => 0,
        }
    }
}

/// State shared between the engine handle, transactions and the sweeper.
pub(crate) struct Shared {
    pub(crate) state: RwLock<State>,
    pub(crate) journal: Mutex<Journal>,
    pub(crate) config: Config,
    pub(crate) stats: SweepStats,
    next_txn: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn next_txn(&self) -> u64 {
        self.next_txn.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Append `batch`, closing the engine if the journal is left poisoned.
    pub(crate) fn journal_append(&self, journal: &mut Journal, batch: &[Record]) -> EngineResult<()> {
        let result = journal.append(batch);
        if let Err(e) = &result {
            if journal.is_poisoned() && !self.closed.swap(true, Ordering::AcqRel) {
                error!(error = %e, "journal poisoned, engine closed");
            }
        }
        result
    }

    /// Drop expired slots from memory and indexes.
    ///
    /// Nothing is journaled: replay skips expired puts on its own.
    pub(crate) fn purge_expired(&self) -> usize {
        let purged = self.state.write().purge_expired(now_millis());
        if purged > 0 {
            debug!(purged, "expired entries purged");
        }
        self.stats.record_purged(purged as u64);
        purged
    }

    /// Rewrite the WAL as a single checkpoint batch.
    ///
    /// Without `force`, only runs once the journal is past
    /// `compaction_min_records` and its dead ratio exceeds the trigger.
    pub(crate) fn compact(&self, force: bool) -> EngineResult<Option<CompactionResult>> {
        let mut journal = self.journal.lock();
        let Journal::Disk { writer, records } = &mut *journal else {
            return Ok(None);
        };

        let now = now_millis();
        let snapshot = {
            let state = self.state.read();
            let live = (state.live_count(now) + state.indexes.definitions().len() + 2) as u64;
            if !force && !should_compact(*records, live, &self.config) {
                return Ok(None);
            }
            state.snapshot(self.next_txn(), now)
        };

        let result = compact_wal(writer, &snapshot, *records)?;
        *records = snapshot.len() as u64;
        self.stats.record_compaction();
        info!(
            segment = %result.segment_path.display(),
            records_before = result.records_before,
            records_after = result.records_after,
            bytes_saved = result.bytes_saved(),
            "WAL compacted"
        );
        Ok(Some(result))
    }
}

fn should_compact(records: u64, live: u64, config: &Config) -> bool {
    if records < config.compaction_min_records || records == 0 {
        return false;
    }
    let dead = records.saturating_sub(live) as f64 / records as f64;
    dead > config.compaction_trigger_ratio
}

/// Outcome of replaying the WAL at open.
struct Replayed {
    state: State,
    last_txn: u64,
    records: u64,
    applied: usize,
    dropped: usize,
}

/// Rebuild state from raw WAL entries.
///
/// A batch is applied only when its `Commit` arrives with a matching count
/// and every record carries the commit's txn id; anything else is dropped
/// whole. Expired puts are skipped.
fn replay(entries: Vec<WalEntry>, now: u64) -> Replayed {
    let mut state = State::default();
    let mut batch: Vec<Record> = Vec::new();
    let (mut last_txn, mut records, mut applied, mut dropped) = (0u64, 0u64, 0usize, 0usize);

    for WalEntry { record, .. } in entries {
        records += 1;
        last_txn = last_txn.max(record.txn);

        if record.operation == Operation::Commit {
            let expected = record.batch_len().map(|n| n as usize);
            if expected == Some(batch.len()) && batch.iter().all(|r| r.txn == record.txn) {
                apply_batch(&mut state, std::mem::take(&mut batch), now);
                applied += 1;
            } else {
                warn!(txn = record.txn, expected = ?expected, found = batch.len(), "dropping damaged batch");
                batch.clear();
                dropped += 1;
            }
            continue;
        }

        if batch.first().is_some_and(|first| first.txn != record.txn) {
            warn!(txn = batch[0].txn, records = batch.len(), "dropping batch without commit");
            batch.clear();
            dropped += 1;
        }
        batch.push(record);
    }

    if !batch.is_empty() {
        warn!(txn = batch[0].txn, records = batch.len(), "discarding uncommitted WAL tail");
        dropped += 1;
    }

    let State { entries, indexes } = &mut state;
    indexes.rebuild(entries);

    Replayed { state, last_txn, records, applied, dropped }
}

fn apply_batch(state: &mut State, batch: Vec<Record>, now: u64) {
    for record in batch {
        match record.operation {
            Operation::Checkpoint => *state = State::default(),
            Operation::Put => {
                let slot = Slot { value: record.value, expires_at: record.expires_at };
                if slot.is_live(now) {
                    state.entries.insert(record.key, slot);
                } else {
                    state.entries.remove(&record.key);
                }
            }
            Operation::Delete => {
                state.entries.remove(&record.key);
            }
            Operation::DeclareIndex => {
                let name = String::from_utf8_lossy(&record.key).into_owned();
                if let Err(e) = state.indexes.declare(&name, &record.value, std::iter::empty::<&Vec<u8>>()) {
                    warn!(index = %name, error = %e, "ignoring conflicting index declaration");
                }
            }
            Operation::Commit => {}
        }
    }
}

/// Embedded ordered key-value engine with TTL and prefix indexes.
///
/// All methods take `&self`; share it behind an `Arc` across threads.
pub struct Engine {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<SweeperHandle>>,
    path: Option<PathBuf>,
}

impl Engine {
    /// Open or create an engine at `path`, replaying its WAL.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> EngineResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let wal_dir = path.join("wal");

        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| EngineError::io_at(&wal_dir, &e, "Failed to create WAL directory"))?;
        remove_stale_temp_segments(&wal_dir)?;

        let entries = WalReader::new(&wal_dir).recover_entries()?;
        let replayed = replay(entries, now_millis());
        info!(
            path = %path.display(),
            entries = replayed.state.entries.len(),
            batches = replayed.applied,
            dropped = replayed.dropped,
            "engine opened"
        );

        let writer = WalWriter::new(&wal_dir, config.wal_rotation_size_bytes, config.sync_on_commit)?;
        let journal = Journal::Disk { writer, records: replayed.records };
        Ok(Self::assemble(replayed.state, journal, replayed.last_txn + 1, config, Some(path)))
    }

    /// An engine with no journal; everything is lost on drop.
    pub fn open_in_memory(config: Config) -> EngineResult<Self> {
        config.validate()?;
        debug!("in-memory engine opened");
        Ok(Self::assemble(State::default(), Journal::Memory, 1, config, None))
    }

    fn assemble(state: State, journal: Journal, next_txn: u64, config: Config, path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                journal: Mutex::new(journal),
                config,
                stats: SweepStats::new(),
                next_txn: AtomicU64::new(next_txn),
                closed: AtomicBool::new(false),
            }),
            sweeper: Mutex::new(None),
            path,
        }
    }

    /// Begin a read-only transaction over a consistent snapshot.
    ///
    /// Holds a shared lock until dropped; do not open a write transaction
    /// on the same thread while it is alive.
    pub fn begin_read(&self) -> EngineResult<ReadTx<'_>> {
        self.shared.ensure_open()?;
        Ok(ReadTx::new(self.shared.state.read(), now_millis()))
    }

    /// Begin a read-write transaction. Blocks while another writer is active.
    pub fn begin_write(&self) -> EngineResult<WriteTx<'_>> {
        self.shared.ensure_open()?;
        let journal = self.shared.journal.lock();
        // closed while we waited for the lock
        self.shared.ensure_open()?;
        Ok(WriteTx::new(&self.shared, journal, now_millis()))
    }

    /// Declare a persistent index over every key starting with `prefix`.
    ///
    /// Returns `true` if the index was created, `false` if the identical
    /// declaration already existed. A different prefix under an existing
    /// name is an [`EngineError::IndexConflict`].
    pub fn declare_index(&self, name: &str, prefix: &[u8]) -> EngineResult<bool> {
        self.shared.ensure_open()?;
        let mut journal = self.shared.journal.lock();
        {
            let state = self.shared.state.read();
            state.indexes.check(name, prefix)?;
            if state.indexes.contains(name) {
                return Ok(false);
            }
        }

        let txn = self.shared.next_txn();
        self.shared
            .journal_append(&mut journal, &[Record::declare_index(txn, name, prefix), Record::commit(txn, 1)])?;

        let mut state = self.shared.state.write();
        let State { entries, indexes } = &mut *state;
        let created = indexes.declare(name, prefix, entries.keys())?;
        info!(index = name, txn, "index declared");
        Ok(created)
    }

    /// All declared indexes, sorted by name.
    pub fn indexes(&self) -> Vec<IndexDef> {
        self.shared.state.read().indexes.definitions()
    }

    /// Start the background expiry sweeper. No-op if already running.
    pub fn start_sweeper(&self) -> EngineResult<()> {
        self.shared.ensure_open()?;
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|h| h.is_running()) {
            return Ok(());
        }
        *sweeper = Some(start_sweeper(Arc::clone(&self.shared))?);
        Ok(())
    }

    /// Stop the background sweeper gracefully.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.shutdown();
        }
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.lock().as_ref().is_some_and(|h| h.is_running())
    }

    /// Purge expired entries now instead of waiting for the sweeper.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    /// Compact the WAL unconditionally. `None` for in-memory engines.
    pub fn compact(&self) -> EngineResult<Option<CompactionResult>> {
        self.shared.ensure_open()?;
        self.shared.compact(true)
    }

    /// Records currently in the WAL (0 in memory).
    pub fn journal_records(&self) -> u64 {
        self.shared.journal.lock().records()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.shared.state.read().live_count(now_millis())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data directory, `None` in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Entries removed by expiry purges since open.
    pub fn purged_total(&self) -> u64 {
        self.shared.stats.purged()
    }

    /// Sweeper cycles completed since open.
    pub fn sweep_cycles(&self) -> u64 {
        self.shared.stats.cycles()
    }

    /// Compactions completed since open.
    pub fn compactions(&self) -> u64 {
        self.shared.stats.compactions()
    }

    /// Force the WAL to persistent storage.
    pub fn sync(&self) -> EngineResult<()> {
        self.shared.journal.lock().sync()
    }

    /// `Ok` while the engine accepts transactions.
    pub fn check_open(&self) -> EngineResult<()> {
        self.shared.ensure_open()
    }

    /// Stop the sweeper, sync the WAL and refuse further transactions.
    pub fn close(&self) -> EngineResult<()> {
        self.stop_sweeper();
        let journal = self.shared.journal.lock();
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        journal.sync()?;
        info!(path = ?self.path, "engine closed");
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

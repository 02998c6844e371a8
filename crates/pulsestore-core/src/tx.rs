//! Read and write transactions.
//!
//! A [`ReadTx`] pins the state behind a shared lock. A [`WriteTx`] owns the
//! journal lock, buffers its writes, and only touches shared state on
//! [`WriteTx::commit`]. Dropping a write transaction discards it.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::{MutexGuard, RwLockReadGuard};
use tracing::debug;

use crate::engine::{expiry_after, Journal, Shared, Slot, State};
use crate::error::{EngineError, EngineResult};
use crate::format::{Record, NO_EXPIRY};

fn remaining(slot: &Slot, now: u64) -> Option<Duration> {
    if slot.expires_at == NO_EXPIRY {
        None
    } else {
        Some(Duration::from_millis(slot.expires_at.saturating_sub(now)))
    }
}

/// Read-only view of a consistent snapshot.
pub struct ReadTx<'a> {
    state: RwLockReadGuard<'a, State>,
    now: u64,
}

impl<'a> ReadTx<'a> {
    pub(crate) fn new(state: RwLockReadGuard<'a, State>, now: u64) -> Self {
        Self { state, now }
    }

    /// Value for `key`, absent once expired.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.state.get_live(key, self.now).map(|slot| slot.value.as_slice())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.state.get_live(key, self.now).is_some()
    }

    /// Time left before `key` expires.
    ///
    /// `None` if absent, `Some(None)` if it never expires.
    pub fn expires_in(&self, key: &[u8]) -> Option<Option<Duration>> {
        self.state.get_live(key, self.now).map(|slot| remaining(slot, self.now))
    }

    /// Live pairs whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.state
            .live_prefix(prefix, self.now)
            .map(|(k, slot)| (k.clone(), slot.value.clone()))
            .collect()
    }

    /// Live keys in the named index, in key order.
    pub fn index_keys(&self, name: &str) -> EngineResult<Vec<Vec<u8>>> {
        let members = self.state.indexes.members(name)?;
        Ok(members
            .iter()
            .filter(|key| self.contains_key(key))
            .cloned()
            .collect())
    }

    pub fn index_len(&self, name: &str) -> EngineResult<usize> {
        let members = self.state.indexes.members(name)?;
        Ok(members.iter().filter(|key| self.contains_key(key)).count())
    }
}

#[derive(Debug)]
enum Pending {
    Put(Slot),
    Delete,
}

/// Exclusive read-write transaction.
///
/// Reads see this transaction's own uncommitted writes.
pub struct WriteTx<'a> {
    shared: &'a Shared,
    journal: MutexGuard<'a, Journal>,
    pending: BTreeMap<Vec<u8>, Pending>,
    now: u64,
}

impl<'a> WriteTx<'a> {
    pub(crate) fn new(shared: &'a Shared, journal: MutexGuard<'a, Journal>, now: u64) -> Self {
        Self { shared, journal, pending: BTreeMap::new(), now }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(key) {
            Some(Pending::Put(slot)) => slot.is_live(self.now).then(|| slot.value.clone()),
            Some(Pending::Delete) => None,
            None => self
                .shared
                .state
                .read()
                .get_live(key, self.now)
                .map(|slot| slot.value.clone()),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        match self.pending.get(key) {
            Some(Pending::Put(slot)) => slot.is_live(self.now),
            Some(Pending::Delete) => false,
            None => self.shared.state.read().get_live(key, self.now).is_some(),
        }
    }

    /// Time left before `key` expires; see [`ReadTx::expires_in`].
    pub fn expires_in(&self, key: &[u8]) -> Option<Option<Duration>> {
        match self.pending.get(key) {
            Some(Pending::Put(slot)) => slot.is_live(self.now).then(|| remaining(slot, self.now)),
            Some(Pending::Delete) => None,
            None => self
                .shared
                .state
                .read()
                .get_live(key, self.now)
                .map(|slot| remaining(slot, self.now)),
        }
    }

    /// Stage a write. `ttl` of `None` never expires.
    ///
    /// Returns `true` when a live value was replaced.
    pub fn put(&mut self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> EngineResult<bool> {
        let config = &self.shared.config;
        if key.is_empty() || key.len() > config.max_key_size {
            return Err(EngineError::OversizedEntry {
                entry_size: key.len() as u64,
                max_size: config.max_key_size as u64,
                component: "key".into(),
            });
        }
        if value.len() > config.max_value_size {
            return Err(EngineError::OversizedEntry {
                entry_size: value.len() as u64,
                max_size: config.max_value_size as u64,
                component: "value".into(),
            });
        }

        let replaced = self.contains_key(key);
        let slot = Slot { value: value.to_vec(), expires_at: expiry_after(self.now, ttl) };
        self.pending.insert(key.to_vec(), Pending::Put(slot));
        Ok(replaced)
    }

    /// Stage a delete. Returns `true` if a live value existed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let existed = self.contains_key(key);
        if existed || self.pending.contains_key(key) {
            self.pending.insert(key.to_vec(), Pending::Delete);
        }
        existed
    }

    /// Live pairs under `prefix`, overlaid with staged writes.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .shared
            .state
            .read()
            .live_prefix(prefix, self.now)
            .map(|(k, slot)| (k.clone(), slot.value.clone()))
            .collect();
        self.overlay(prefix, |key, pending| match pending {
            Pending::Put(slot) if slot.is_live(self.now) => {
                merged.insert(key.clone(), slot.value.clone());
            }
            _ => {
                merged.remove(key);
            }
        });
        merged.into_iter().collect()
    }

    /// Live keys in the named index, overlaid with staged writes.
    pub fn index_keys(&self, name: &str) -> EngineResult<Vec<Vec<u8>>> {
        let (mut keys, prefix) = {
            let state = self.shared.state.read();
            let keys: std::collections::BTreeSet<Vec<u8>> = state
                .indexes
                .members(name)?
                .iter()
                .filter(|key| state.get_live(key, self.now).is_some())
                .cloned()
                .collect();
            (keys, state.indexes.prefix(name)?.to_vec())
        };
        self.overlay(&prefix, |key, pending| match pending {
            Pending::Put(slot) if slot.is_live(self.now) => {
                keys.insert(key.clone());
            }
            _ => {
                keys.remove(key);
            }
        });
        Ok(keys.into_iter().collect())
    }

    fn overlay<F>(&self, prefix: &[u8], mut f: F)
    where
        F: FnMut(&Vec<u8>, &Pending),
    {
        for (key, pending) in self.pending.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            f(key, pending);
        }
    }

    /// Number of staged writes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Journal the staged writes as one batch, then apply them.
    ///
    /// If the journal append fails nothing is applied, and nothing replays.
    /// A journal poisoned by the failure closes the engine.
    pub fn commit(mut self) -> EngineResult<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let txn = self.shared.next_txn();
        let mut batch: Vec<Record> = pending
            .iter()
            .map(|(key, p)| match p {
                Pending::Put(slot) => Record::put(txn, key.clone(), slot.value.clone(), slot.expires_at),
                Pending::Delete => Record::delete(txn, key.clone()),
            })
            .collect();
        let len = batch.len();
        batch.push(Record::commit(txn, len as u32));
        self.shared.journal_append(&mut self.journal, &batch)?;

        let mut state = self.shared.state.write();
        for (key, p) in pending {
            match p {
                Pending::Put(slot) => state.apply_put(key, slot),
                Pending::Delete => state.apply_delete(&key),
            }
        }
        debug!(txn, records = len, "transaction committed");
        Ok(())
    }

    /// Discard all staged writes.
    pub fn rollback(self) {
        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "transaction rolled back");
        }
    }
}

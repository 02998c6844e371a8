//! Prefix indexes
//!
//! An index is a named key prefix plus the ordered set of live keys under
//! it. Declarations are persisted through the WAL; membership is derived
//! state, rebuilt on recovery and kept current on every commit and purge.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use crate::error::{EngineError, EngineResult};

/// Persisted part of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub prefix: Vec<u8>,
}

#[derive(Debug)]
struct Index {
    prefix: Vec<u8>,
    members: BTreeSet<Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct IndexRegistry {
    indexes: HashMap<String, Index>,
}

impl IndexRegistry {
    /// Register `name` over `prefix`, backfilling from `keys`.
    ///
    /// Returns `Ok(false)` when the identical declaration already exists.
    pub(crate) fn declare<'k, I>(&mut self, name: &str, prefix: &[u8], keys: I) -> EngineResult<bool>
    where
        I: IntoIterator<Item = &'k Vec<u8>>,
    {
        if let Some(existing) = self.indexes.get(name) {
            if existing.prefix == prefix {
                return Ok(false);
            }
            return Err(EngineError::IndexConflict { name: name.to_string() });
        }

        let members = keys
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        self.indexes.insert(name.to_string(), Index { prefix: prefix.to_vec(), members });
        Ok(true)
    }

    /// Error unless declaring `name` over `prefix` would succeed.
    pub(crate) fn check(&self, name: &str, prefix: &[u8]) -> EngineResult<()> {
        match self.indexes.get(name) {
            Some(existing) if existing.prefix != prefix => {
                Err(EngineError::IndexConflict { name: name.to_string() })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub(crate) fn on_put(&mut self, key: &[u8]) {
        for index in self.indexes.values_mut() {
            if key.starts_with(&index.prefix) && !index.members.contains(key) {
                index.members.insert(key.to_vec());
            }
        }
    }

    pub(crate) fn on_delete(&mut self, key: &[u8]) {
        for index in self.indexes.values_mut() {
            if key.starts_with(&index.prefix) {
                index.members.remove(key);
            }
        }
    }

    /// Recompute every member set from `entries`.
    pub(crate) fn rebuild<V>(&mut self, entries: &BTreeMap<Vec<u8>, V>) {
        for index in self.indexes.values_mut() {
            index.members = entries
                .range(index.prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&index.prefix))
                .map(|(k, _)| k.clone())
                .collect();
        }
    }

    pub(crate) fn members(&self, name: &str) -> EngineResult<&BTreeSet<Vec<u8>>> {
        self.indexes
            .get(name)
            .map(|index| &index.members)
            .ok_or_else(|| EngineError::UnknownIndex(name.to_string()))
    }

    pub(crate) fn prefix(&self, name: &str) -> EngineResult<&[u8]> {
        self.indexes
            .get(name)
            .map(|index| index.prefix.as_slice())
            .ok_or_else(|| EngineError::UnknownIndex(name.to_string()))
    }

    /// All declarations, sorted by name.
    pub(crate) fn definitions(&self) -> Vec<IndexDef> {
        let mut defs: Vec<IndexDef> = self
            .indexes
            .iter()
            .map(|(name, index)| IndexDef { name: name.clone(), prefix: index.prefix.clone() })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

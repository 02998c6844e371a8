//! Secondary index declarations.
//!
//! An [`IndexSpec`] names a key prefix and why it is indexed. Specs are
//! validated when declared; declaring the same spec again is a no-op, so
//! [`IndexManager::declare_all`] runs safely on every startup.

use tracing::{debug, info};

use crate::error::{Result, StateError};
use crate::keys::{group_scope_prefix, KeySpace};
use crate::store::Store;

/// Kinds enumerated through an index.
pub const ENUMERATED: [KeySpace; 3] = [KeySpace::UserInfo, KeySpace::LiveInfo, KeySpace::NewsInfo];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPurpose {
    /// List every record of one kind
    Enumerate,
    /// Bulk-delete the video origin marks of one group
    GroupCleanup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub prefix: Vec<u8>,
    pub purpose: IndexPurpose,
}

impl IndexSpec {
    /// Every record of `space`.
    pub fn for_space(space: KeySpace) -> Self {
        Self { name: space.name().to_string(), prefix: space.prefix(), purpose: IndexPurpose::Enumerate }
    }

    /// The video origin marks of `group`.
    pub fn for_group_marks(group: i64) -> Self {
        Self {
            name: format!("{}:{}", KeySpace::GroupVideoOriginMark.name(), group),
            prefix: group_scope_prefix(group),
            purpose: IndexPurpose::GroupCleanup,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(StateError::InvalidIndex { name: self.name.clone(), reason: reason.to_string() })
        };

        if self.name.is_empty() || self.name.chars().any(char::is_control) {
            return invalid("name must be non-empty and printable");
        }
        let Some(space) = self.prefix.first().copied().and_then(KeySpace::from_tag) else {
            return invalid("prefix must start with a known key space");
        };
        if self.purpose == IndexPurpose::GroupCleanup && space != KeySpace::GroupVideoOriginMark {
            return invalid("group cleanup index must cover video origin marks");
        }
        Ok(())
    }
}

/// The set of indexes a deployment needs.
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    specs: Vec<IndexSpec>,
}

impl IndexManager {
    /// Enumerate indexes for users, lives and news, plus one cleanup index per group.
    pub fn plan(groups: &[i64]) -> Self {
        let mut specs: Vec<IndexSpec> = ENUMERATED.into_iter().map(IndexSpec::for_space).collect();
        let mut groups = groups.to_vec();
        groups.sort_unstable();
        groups.dedup();
        specs.extend(groups.into_iter().map(IndexSpec::for_group_marks));
        Self { specs }
    }

    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    /// Validate and declare every planned index. Returns how many were new.
    pub fn declare_all(&self, store: &Store) -> Result<usize> {
        for spec in &self.specs {
            spec.validate()?;
        }
        let mut created = 0;
        for spec in &self.specs {
            if store.create_index(spec)? {
                created += 1;
            } else {
                debug!(index = %spec.name, "index already declared");
            }
        }
        info!(declared = self.specs.len(), created, "indexes ready");
        Ok(created)
    }
}

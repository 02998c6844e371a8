//! Configuration management for PulseStore
//!
//! Provides durability presets and validation. The engine never
//! starts with a configuration that fails [`Config::validate`].

use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::format::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// PulseStore configuration with durability presets
#[derive(Debug, Clone)]
pub struct Config {
    /// fsync the WAL at the end of every committed transaction
    pub sync_on_commit: bool,
    /// WAL segment rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Compaction trigger: compact when dead record ratio exceeds this
    pub compaction_trigger_ratio: f64,
    /// Never compact a journal holding fewer records than this
    pub compaction_min_records: u64,
    /// Background expiry sweep cadence
    pub sweep_cadence: Duration,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
}

impl Config {
    /// Every commit reaches persistent media before it becomes visible.
    pub fn durable() -> Self {
        Self {
            sync_on_commit: true,
            wal_rotation_size_bytes: 64 * 1024 * 1024,
            compaction_trigger_ratio: 0.5,
            compaction_min_records: 10_000,
            sweep_cadence: Duration::from_secs(30),
            max_key_size: 512,
            max_value_size: 4 * 1024 * 1024,
        }
    }

    /// Commits land in the OS page cache; a crash may lose the last few.
    pub fn relaxed() -> Self {
        Self {
            sync_on_commit: false,
            ..Self::durable()
        }
    }

    /// Small limits and a fast sweep, for tests and in-memory stores.
    pub fn ephemeral() -> Self {
        Self {
            sync_on_commit: false,
            wal_rotation_size_bytes: 4 * 1024 * 1024,
            compaction_trigger_ratio: 0.5,
            compaction_min_records: 64,
            sweep_cadence: Duration::from_millis(200),
            max_key_size: 512,
            max_value_size: 1024 * 1024,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if self.wal_rotation_size_bytes < 64 * 1024 {
            return invalid("wal_rotation_size_bytes must be >= 64KB");
        }
        if self.compaction_trigger_ratio <= 0.0 || self.compaction_trigger_ratio >= 1.0 {
            return invalid("compaction_trigger_ratio must be in (0.0, 1.0)");
        }
        if self.sweep_cadence.as_millis() == 0 {
            return invalid("sweep_cadence must be > 0");
        }
        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return invalid("max_key_size must be in [1, 1024]");
        }
        if self.max_value_size == 0 || self.max_value_size > MAX_VALUE_SIZE {
            return invalid("max_value_size must be in [1, 32MB]");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::durable()
    }
}

//! PulseStore Core: embedded ordered key-value engine
//!
//! An in-memory ordered map made durable by a CRC32C-checked write-ahead
//! log. Writes are grouped into transactions that commit atomically; reads
//! run against a consistent snapshot.
//!
//! # Architecture
//!
//! - **Read path**: served from memory under a shared lock
//! - **Write path**: WAL batch first, then memory (crash-safe)
//! - **TTL**: entries carry an optional absolute expiry and read as absent
//!   once it passes
//! - **Indexes**: named key prefixes whose live members can be enumerated
//! - **Sweeper**: background purge of expired entries plus WAL compaction

pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod index;
pub mod platform_durability;
pub mod sweeper;
pub mod tx;
pub mod wal;

pub use compaction::CompactionResult;
pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use format::Operation;
pub use index::IndexDef;
pub use sweeper::{SweepStats, SweeperHandle};
pub use tx::{ReadTx, WriteTx};
pub use wal::{WalReader, WalWriter};

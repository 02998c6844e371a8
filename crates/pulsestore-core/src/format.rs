//! Binary format definitions for PulseStore WAL records
//!
//! Every record follows one layout:
//! ChunkHeader (32 bytes) + key_len(u16) + value_len(u32) + operation(u8) + padding(u8)
//! + txn(u64) + expires_at(u64) + key_bytes + value_bytes
//!
//! All integers are little-endian. The records of one transaction share a
//! `txn` id and are closed by a `Commit` record whose value is the number of
//! records in the batch.

use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Magic bytes identifying PulseStore WAL records: "PSKV"
pub const MAGIC_ARRAY: [u8; 4] = *b"PSKV";

/// Hard cap on key size in bytes
pub const MAX_KEY_SIZE: usize = 1024;

/// Hard cap on value size in bytes (32MB)
pub const MAX_VALUE_SIZE: usize = 32 * 1024 * 1024;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Fixed payload prefix: key_len + value_len + op + pad + txn + expires_at
const PAYLOAD_FIXED: usize = 2 + 4 + 1 + 1 + 8 + 8;

/// `expires_at` value for slots that never expire
pub const NO_EXPIRY: u64 = 0;

/// WAL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or update a key-value pair
    Put = 1,
    /// Delete a key
    Delete = 2,
    /// Close a transaction batch; value holds the batch size (u32 LE)
    Commit = 3,
    /// Declare a prefix index; key is the name, value the prefix
    DeclareIndex = 4,
    /// Discard all state replayed so far (first record of a compacted segment)
    Checkpoint = 5,
}

impl Operation {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            3 => Some(Operation::Commit),
            4 => Some(Operation::DeclareIndex),
            5 => Some(Operation::Checkpoint),
            _ => None,
        }
    }
}

/// Fixed-size header for each WAL record
///
/// Layout:
///   [0..4]   magic:      [u8;4] - "PSKV"
///   [4..8]   length:     u32    - payload length in bytes
///   [8..12]  checksum:   u32    - CRC32C of payload bytes
///   [12]     entry_type: u8     - operation type
///   [13..32] reserved, zero
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    pub magic: [u8; 4],
    pub length: u32,
    pub checksum: u32,
    pub entry_type: u8,
}

impl ChunkHeader {
    pub fn new(length: u32, checksum: u32, entry_type: Operation) -> Self {
        Self {
            magic: MAGIC_ARRAY,
            length,
            checksum,
            entry_type: entry_type as u8,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.entry_type;
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            entry_type: bytes[12],
        }
    }
}

/// One logical journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub operation: Operation,
    pub txn: u64,
    /// Unix milliseconds, [`NO_EXPIRY`] for none. Only meaningful for `Put`.
    pub expires_at: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn put(txn: u64, key: Vec<u8>, value: Vec<u8>, expires_at: u64) -> Self {
        Self { operation: Operation::Put, txn, expires_at, key, value }
    }

    pub fn delete(txn: u64, key: Vec<u8>) -> Self {
        Self { operation: Operation::Delete, txn, expires_at: NO_EXPIRY, key, value: Vec::new() }
    }

    pub fn commit(txn: u64, batch_len: u32) -> Self {
        Self {
            operation: Operation::Commit,
            txn,
            expires_at: NO_EXPIRY,
            key: Vec::new(),
            value: batch_len.to_le_bytes().to_vec(),
        }
    }

    pub fn declare_index(txn: u64, name: &str, prefix: &[u8]) -> Self {
        Self {
            operation: Operation::DeclareIndex,
            txn,
            expires_at: NO_EXPIRY,
            key: name.as_bytes().to_vec(),
            value: prefix.to_vec(),
        }
    }

    pub fn checkpoint(txn: u64) -> Self {
        Self { operation: Operation::Checkpoint, txn, expires_at: NO_EXPIRY, key: Vec::new(), value: Vec::new() }
    }

    /// Batch size carried by a `Commit` record.
    pub fn batch_len(&self) -> Option<u32> {
        if self.operation != Operation::Commit {
            return None;
        }
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

/// Complete WAL entry (deserialized)
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub header: ChunkHeader,
    pub record: Record,
}

fn corrupted(offset: usize, reason: String) -> EngineError {
    EngineError::WalCorrupted { path: PathBuf::from("<buffer>"), offset: offset as u64, reason }
}

/// Serialize a record into its on-disk bytes.
pub fn serialize_entry(record: &Record) -> EngineResult<Vec<u8>> {
    // Size checks run before any allocation
    if record.key.len() > MAX_KEY_SIZE {
        return Err(EngineError::OversizedEntry {
            entry_size: record.key.len() as u64,
            max_size: MAX_KEY_SIZE as u64,
            component: "key".to_string(),
        });
    }
    if record.value.len() > MAX_VALUE_SIZE {
        return Err(EngineError::OversizedEntry {
            entry_size: record.value.len() as u64,
            max_size: MAX_VALUE_SIZE as u64,
            component: "value".to_string(),
        });
    }

    let payload_size = PAYLOAD_FIXED + record.key.len() + record.value.len();

    let mut payload = Vec::with_capacity(payload_size);
    payload.extend_from_slice(&(record.key.len() as u16).to_le_bytes());
    payload.extend_from_slice(&(record.value.len() as u32).to_le_bytes());
    payload.push(record.operation as u8);
    payload.push(0);
    payload.extend_from_slice(&record.txn.to_le_bytes());
    payload.extend_from_slice(&record.expires_at.to_le_bytes());
    payload.extend_from_slice(&record.key);
    payload.extend_from_slice(&record.value);

    let checksum = crc32c::crc32c(&payload);
    let header = ChunkHeader::new(payload.len() as u32, checksum, record.operation);

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload_size);
    buffer.extend_from_slice(&header.to_bytes());
    buffer.extend_from_slice(&payload);
    Ok(buffer)
}

/// Deserialize one record from the start of `data`.
pub fn deserialize_entry(data: &[u8]) -> EngineResult<WalEntry> {
    if data.len() < HEADER_SIZE {
        return Err(corrupted(0, format!("Entry too short: {} bytes, need at least {}", data.len(), HEADER_SIZE)));
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
    let header = ChunkHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(EngineError::NoMagicFound {
            path: PathBuf::from("<buffer>"),
            offset: 0,
            found_bytes: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(EngineError::TornWrite {
            path: PathBuf::from("<buffer>"),
            expected_size: header.length,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset: HEADER_SIZE as u64,
        });
    }

    let payload = &data[HEADER_SIZE..payload_end];

    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(EngineError::ChecksumMismatch {
            path: PathBuf::from("<buffer>"),
            expected: header.checksum,
            actual: computed,
            offset: HEADER_SIZE as u64,
        });
    }

    if payload.len() < PAYLOAD_FIXED {
        return Err(corrupted(HEADER_SIZE, "Payload too short for fixed fields".to_string()));
    }

    let key_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let value_len = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;
    let operation = Operation::from_u8(payload[6])
        .ok_or_else(|| corrupted(HEADER_SIZE + 6, format!("Invalid operation type: {}", payload[6])))?;

    let mut word = [0u8; 8];
    word.copy_from_slice(&payload[8..16]);
    let txn = u64::from_le_bytes(word);
    word.copy_from_slice(&payload[16..24]);
    let expires_at = u64::from_le_bytes(word);

    let key_end = PAYLOAD_FIXED + key_len;
    let value_end = key_end + value_len;
    if payload.len() < value_end {
        return Err(corrupted(
            HEADER_SIZE,
            format!("Payload too short: need {} bytes for key({}) + value({})", value_end, key_len, value_len),
        ));
    }

    Ok(WalEntry {
        header,
        record: Record {
            operation,
            txn,
            expires_at,
            key: payload[PAYLOAD_FIXED..key_end].to_vec(),
            value: payload[key_end..value_end].to_vec(),
        },
    })
}

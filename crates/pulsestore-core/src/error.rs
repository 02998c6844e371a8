//! Error types for PulseStore engine operations
//!
//! Every engine failure is an [`EngineError`]. Journal variants carry the
//! file and byte offset so recovery problems can be traced to disk.

use std::path::PathBuf;

use thiserror::Error;

/// PulseStore engine errors with detailed context
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", .path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// WAL record is malformed
    #[error("WAL corrupted in {} at offset {offset}: {reason}", .path.display())]
    WalCorrupted {
        /// Path to the corrupted WAL file
        path: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64,
        /// Description of the corruption
        reason: String,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
        offset: u64,
    },

    /// Torn write detected (partial record at end of file)
    #[error("Torn write in {} at offset {offset}: expected {expected_size} bytes, only {available_bytes} available", .path.display())]
    TornWrite {
        path: PathBuf,
        expected_size: u32,
        available_bytes: u64,
        offset: u64,
    },

    /// Key or value exceeds the configured limit
    #[error("Entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        entry_size: u64,
        max_size: u64,
        /// Whether it's the key or value that's oversized
        component: String,
    },

    /// Magic bytes not found at expected location
    #[error(
        "Magic bytes not found in {} at offset {offset}: found {:02x}{:02x}{:02x}{:02x}",
        .path.display(), .found_bytes[0], .found_bytes[1], .found_bytes[2], .found_bytes[3]
    )]
    NoMagicFound {
        path: PathBuf,
        offset: u64,
        found_bytes: [u8; 4],
    },

    /// An index with this name already covers a different prefix
    #[error("index `{name}` is already declared over a different prefix")]
    IndexConflict { name: String },

    /// Enumeration requested on an index that was never declared
    #[error("unknown index `{0}`")]
    UnknownIndex(String),

    /// Configuration rejected by [`crate::Config::validate`]
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A failed append left the active segment in an unknown state
    #[error("WAL writer for {} is poisoned by an earlier failed append", .path.display())]
    JournalPoisoned { path: PathBuf },

    /// The engine has been closed
    #[error("engine is closed")]
    Closed,
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl EngineError {
    /// Wrap an I/O error with the path it happened on.
    pub(crate) fn io_at(path: impl Into<PathBuf>, err: &std::io::Error, context: &str) -> Self {
        EngineError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::ChecksumMismatch {
            path: PathBuf::from("/tmp/test.pwal"),
            expected: 0x12345678,
            actual: 0x87654321,
            offset: 1024,
        };

        let display = err.to_string();
        assert!(display.contains("Checksum mismatch"));
        assert!(display.contains("0x12345678"));
        assert!(display.contains("0x87654321"));
    }

    #[test]
    fn test_io_display_with_and_without_path() {
        let err = EngineError::Io {
            path: None,
            kind: std::io::ErrorKind::PermissionDenied,
            message: "denied".into(),
        };
        assert!(err.to_string().starts_with("I/O error: denied"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = EngineError::io_at("/data/wal", &io, "Failed to open WAL file");
        let display = err.to_string();
        assert!(display.contains("in /data/wal"));
        assert!(display.contains("Failed to open WAL file"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EngineError = io_err.into();

        match err {
            EngineError::Io { kind, .. } => assert_eq!(kind, std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_magic_display() {
        let err = EngineError::NoMagicFound {
            path: PathBuf::from("<buffer>"),
            offset: 0,
            found_bytes: [0xde, 0xad, 0xbe, 0xef],
        };
        assert!(err.to_string().contains("deadbeef"));
    }
}

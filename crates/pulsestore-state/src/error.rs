//! Error types for the state layer.
//!
//! Two classes matter to callers: [`StateError::NotFound`] is the normal
//! "no prior state" outcome of a read, everything else is an operational
//! failure. Use [`StateError::is_not_found`] to tell them apart.

use pulsestore_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    /// No record stored under the key
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// A write was called without its payload
    #[error("missing {0} payload")]
    MissingPayload(&'static str),

    #[error("failed to encode {entity}: {source}")]
    Encode {
        entity: &'static str,
        #[source]
        source: postcard::Error,
    },

    /// Stored bytes exist but do not decode
    #[error("failed to decode {entity}: {source}")]
    Decode {
        entity: &'static str,
        #[source]
        source: postcard::Error,
    },

    /// A live or news record references a user that is not stored
    #[error("user {mid} referenced but not stored")]
    MissingUser { mid: i64 },

    /// Video origin mark already set for this group
    #[error("video origin mark for `{video_id}` already exists in group {group}")]
    MarkExists { group: i64, video_id: String },

    #[error("invalid index `{name}`: {reason}")]
    InvalidIndex { name: String, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl StateError {
    pub(crate) fn not_found(entity: &'static str) -> Self {
        StateError::NotFound { entity }
    }

    /// `true` for the NotFound class, `false` for operational errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(StateError::not_found("user info").is_not_found());
        assert!(!StateError::MissingPayload("user info").is_not_found());
        assert!(!StateError::MissingUser { mid: 1 }.is_not_found());
        assert!(!StateError::from(EngineError::Closed).is_not_found());
    }

    #[test]
    fn test_display() {
        let err = StateError::MarkExists { group: 7, video_id: "BV1".into() };
        assert_eq!(err.to_string(), "video origin mark for `BV1` already exists in group 7");
        assert_eq!(StateError::not_found("live info").to_string(), "live info not found");
    }
}

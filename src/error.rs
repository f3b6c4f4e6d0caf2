//! Error types for the configuration client.

use crate::types::{ConfigField, SyncState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed or truncated configuration payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("hex payload has odd length {len}")]
    OddLength { len: usize },

    #[error("invalid hex character {character:?} at index {index}")]
    InvalidHex { character: char, index: usize },

    #[error("payload of {len} bytes is shorter than the 2 byte header")]
    MissingHeader { len: usize },

    /// A length byte declares more bytes than the buffer still holds.
    #[error(
        "field {field} at offset {offset} declares {declared} bytes but only {available} remain"
    )]
    Truncated {
        field: ConfigField,
        offset: usize,
        declared: usize,
        available: usize,
    },
}

/// Field value that must never reach the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("encryption must be between 0 and 7, got {0}")]
    EncryptionOutOfRange(u64),

    #[error("field {field} is {len} characters long, at most 255 are allowed")]
    FieldTooLong { field: ConfigField, len: usize },

    #[error("field {field} contains {character:?} which does not fit in a single byte")]
    UnsupportedCharacter { field: ConfigField, character: char },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: ConfigField, reason: String },
}

/// Failure of a single device request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent or the connection dropped. This is what a
    /// device reset looks like from the client side.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("device answered with status {status}")]
    Status { status: u16 },

    #[error("failed to read response body: {0}")]
    Body(String),

    /// The request never left the client, e.g. the device URL is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_connection(&self) -> bool {
        matches!(self, TransportError::Connection(_))
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Errors returned by [`crate::services::sync::SyncController`] operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("controller is busy ({state})")]
    Busy { state: SyncState },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("operation was cancelled")]
    Cancelled,
}

/// Failure reported to observers, separate from the reboot recovery path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum SyncFailure {
    Format(String),
    Validation(String),
    Transport(String),
}

impl SyncError {
    /// The observer-facing failure for this error, if it is one.
    pub fn failure(&self) -> Option<SyncFailure> {
        match self {
            SyncError::Busy { .. } | SyncError::Cancelled => None,
            SyncError::Format(e) => Some(SyncFailure::Format(e.to_string())),
            SyncError::Validation(e) => Some(SyncFailure::Validation(e.to_string())),
            SyncError::Transport(e) => Some(SyncFailure::Transport(e.to_string())),
        }
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncFailure::Format(msg) => write!(f, "malformed device configuration: {msg}"),
            SyncFailure::Validation(msg) => write!(f, "invalid configuration: {msg}"),
            SyncFailure::Transport(msg) => write!(f, "device unreachable: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_not_reported_as_failure() {
        let err = SyncError::Busy {
            state: SyncState::Saving,
        };
        assert_eq!(err.failure(), None);
    }

    #[test]
    fn format_error_maps_to_format_failure() {
        let err = SyncError::from(FormatError::OddLength { len: 3 });
        assert_eq!(
            err.failure(),
            Some(SyncFailure::Format(
                "hex payload has odd length 3".to_string()
            ))
        );
    }

    #[test]
    fn only_connection_errors_are_connection() {
        assert!(TransportError::Connection("reset by peer".into()).is_connection());
        assert!(!TransportError::Status { status: 500 }.is_connection());
        assert!(!TransportError::Body("eof".into()).is_connection());
        assert!(!TransportError::InvalidRequest("builder error".into()).is_connection());
    }

    #[test]
    fn invalid_request_is_reported_as_transport_failure() {
        let err = SyncError::from(TransportError::InvalidRequest("builder error".into()));
        assert!(matches!(err.failure(), Some(SyncFailure::Transport(_))));
    }
}

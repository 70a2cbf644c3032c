// src/error.rs
use std::fmt;

use thiserror::Error;

/// Failures of the NDEF codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NdefError {
    #[error("Invalid language tag: {0:?}")]
    InvalidLanguage(String),

    #[error("Truncated NDEF data at byte {0}")]
    Truncated(usize),

    #[error("Empty NDEF message")]
    EmptyMessage,

    #[error("No NDEF TLV found")]
    NoNdefTlv,

    #[error("NDEF message too long for a TLV: {0} bytes")]
    TooLong(usize),
}

/// Errors a tag adapter returns from connect/read/write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("{0}")]
    Transport(String),

    #[error("Tag was lost")]
    TagLost,

    #[error("Not connected")]
    NotConnected,

    #[error("Malformed NDEF: {0}")]
    Malformed(#[from] NdefError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Read,
    Write,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportOp::Read => f.write_str("Read"),
            TransportOp::Write => f.write_str("Write"),
        }
    }
}

/// Every outcome the session controller can report. The `Display` string is
/// the reason handed to the callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("capability unavailable")]
    CapabilityUnavailable,

    /// Absorbed silently by the controller; never reported.
    #[error("Wrong tag. Expected {expected}, got {actual}")]
    WrongTag { expected: String, actual: String },

    #[error("No data to write")]
    NoDataToWrite,

    #[error("Tag does not support NDEF")]
    NoNdefSupport,

    #[error("Tag is read-only")]
    ReadOnlyTag,

    #[error("Not enough space (need {needed}, have {available})")]
    InsufficientCapacity { needed: usize, available: usize },

    #[error("{op} failed: {reason}")]
    Transport { op: TransportOp, reason: String },

    #[error(transparent)]
    Encoding(#[from] NdefError),
}

impl SessionError {
    pub fn read_failed(err: TagError) -> Self {
        SessionError::Transport {
            op: TransportOp::Read,
            reason: err.to_string(),
        }
    }

    pub fn write_failed(err: TagError) -> Self {
        SessionError::Transport {
            op: TransportOp::Write,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error(transparent)]
    Language(#[from] NdefError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_match_reported_strings() {
        assert_eq!(
            SessionError::InsufficientCapacity {
                needed: 12,
                available: 10
            }
            .to_string(),
            "Not enough space (need 12, have 10)"
        );
        assert_eq!(
            SessionError::read_failed(TagError::Transport("timeout".into())).to_string(),
            "Read failed: timeout"
        );
        assert_eq!(
            SessionError::write_failed(TagError::TagLost).to_string(),
            "Write failed: Tag was lost"
        );
        assert_eq!(SessionError::ReadOnlyTag.to_string(), "Tag is read-only");
    }
}

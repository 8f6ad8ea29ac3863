//! Error types and handling for Matchroom
//!
//! Every rejection a connection can receive maps onto an [`ErrorKind`], which is
//! what travels on the wire. None of the rejection kinds are fatal to a session:
//! the room stays exactly as it was and the submitting client rolls back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{RoomId, UserId};

/// Result type alias for Matchroom operations
pub type Result<T> = std::result::Result<T, Error>;

/// Matchroom error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("user {0} is already in an active session")]
    AlreadyBusy(UserId),

    #[error("room not found: {0}")]
    NotFound(RoomId),

    #[error("not your turn: waiting for {expected}")]
    NotYourTurn {
        expected: crate::protocol::Role,
        actual: crate::protocol::Role,
    },

    #[error("session {0} is over")]
    SessionOver(RoomId),

    #[error("illegal action: {0}")]
    IllegalAction(String),

    #[error("{0} is not a participant of this room")]
    NotAParticipant(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("challenge not found: {0}")]
    ChallengeNotFound(String),

    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("room {0} is shutting down")]
    Shutdown(RoomId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-level discriminant of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyBusy,
    NotFound,
    NotYourTurn,
    SessionOver,
    IllegalAction,
    NotAParticipant,
    ProtocolViolation,
    ChallengeNotFound,
    InvalidChallenge,
    Internal,
}

impl ErrorKind {
    /// Whether this kind of failure ends the session it happened in.
    ///
    /// Rejections never do; sessions end only through resignation,
    /// abandonment, timeouts or a terminal move.
    pub fn is_session_fatal(&self) -> bool {
        false
    }

    /// Rejections the caller can fix by resyncing and retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotYourTurn | Self::NotFound | Self::Internal)
    }
}

impl Error {
    /// Map to the kind carried in a `Rejected` message
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyBusy(_) => ErrorKind::AlreadyBusy,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NotYourTurn { .. } => ErrorKind::NotYourTurn,
            Error::SessionOver(_) => ErrorKind::SessionOver,
            Error::IllegalAction(_) => ErrorKind::IllegalAction,
            Error::NotAParticipant(_) => ErrorKind::NotAParticipant,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::ChallengeNotFound(_) => ErrorKind::ChallengeNotFound,
            Error::InvalidChallenge(_) => ErrorKind::InvalidChallenge,
            Error::Config(_)
            | Error::Serialization(_)
            | Error::Transport(_)
            | Error::Shutdown(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("Failed to parse config: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;

    #[test]
    fn test_rejection_kinds_are_not_fatal() {
        let errors = vec![
            Error::AlreadyBusy(UserId::from("alice")),
            Error::NotFound(RoomId::new()),
            Error::NotYourTurn {
                expected: Role::First,
                actual: Role::Second,
            },
            Error::IllegalAction("no piece there".to_string()),
            Error::NotAParticipant("conn-7".to_string()),
            Error::ProtocolViolation("role flip".to_string()),
        ];

        for error in errors {
            assert!(!error.kind().is_session_fatal(), "{error} must be recoverable");
        }
    }

    #[test]
    fn test_internal_errors_collapse_to_internal_kind() {
        let err = Error::Transport("socket gone".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);

        let json_err = serde_json::from_str::<u8>("nope").unwrap_err();
        assert!(matches!(Error::from(json_err), Error::Serialization(_)));
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::NotAParticipant).unwrap();
        assert_eq!(json, "\"not_a_participant\"");
    }
}

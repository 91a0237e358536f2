use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported frame type")]
    Unsupported,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed session credential")]
    Malformed,

    #[error("Session signature mismatch")]
    BadSignature,

    #[error("Session expired")]
    Expired,
}

/// Error codes reported to the requesting connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    AuthenticationFailure,
    NotAParticipant,
    NotFound,
    NotAuthor,
    BadRequest,
    PersistenceFailure,
}

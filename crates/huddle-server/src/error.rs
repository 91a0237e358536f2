use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use huddle_shared::ErrorCode;
use huddle_store::StoreError;

/// Request-level failures. Each maps to one wire [`ErrorCode`].
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication failed")]
    AuthenticationFailure,

    #[error("Not a participant of this conversation")]
    NotAParticipant,

    #[error("Conversation or message not found")]
    NotFound,

    #[error("Only the author may modify this message")]
    NotAuthor,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::AuthenticationFailure => ErrorCode::AuthenticationFailure,
            ChatError::NotAParticipant => ErrorCode::NotAParticipant,
            ChatError::NotFound => ErrorCode::NotFound,
            ChatError::NotAuthor => ErrorCode::NotAuthor,
            ChatError::BadRequest(_) => ErrorCode::BadRequest,
            ChatError::PersistenceFailure(_) => ErrorCode::PersistenceFailure,
        }
    }

    /// Text safe to show a client. Storage details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::PersistenceFailure(_) => "Could not save the change".to_string(),
            other => other.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ChatError::AuthenticationFailure => StatusCode::UNAUTHORIZED,
            ChatError::NotAParticipant | ChatError::NotAuthor => StatusCode::FORBIDDEN,
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ChatError::NotFound,
            StoreError::NotAParticipant => ChatError::NotAParticipant,
            StoreError::NotAuthor => ChatError::NotAuthor,
            StoreError::Invalid(reason) => ChatError::BadRequest(reason),
            other => ChatError::PersistenceFailure(other.to_string()),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.client_message(),
            }
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The conversation or message does not exist.
    #[error("Record not found")]
    NotFound,

    /// The identity is not a member of the conversation.
    #[error("Identity is not a participant of this conversation")]
    NotAParticipant,

    /// Only the author may edit or delete a message.
    #[error("Only the author may modify this message")]
    NotAuthor,

    /// The request violates a data-model rule.
    #[error("Invalid operation: {0}")]
    Invalid(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Map "no rows" to [`StoreError::NotFound`].
    pub(crate) fn from_lookup(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

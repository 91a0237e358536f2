//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so the HTTP layer can
//! hand them out directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huddle_shared::types::{ConversationId, ConversationKind, IdentityId, MessageId, StaffId};

// ---------------------------------------------------------------------------
// Staff profile
// ---------------------------------------------------------------------------

/// Directory entry linking an identity to its staff profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaffProfile {
    pub identity_id: IdentityId,
    pub staff_id: StaffId,
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A direct or group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Group title. Direct conversations have none.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the newest message, used for inbox ordering.
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_message_id: Option<MessageId>,
    /// Truncated text of the newest message.
    pub last_preview: Option<String>,
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// Membership of one identity in one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub identity_id: IdentityId,
    pub joined_at: DateTime<Utc>,
    /// Everything at or before this instant counts as read.
    pub read_cursor: Option<DateTime<Utc>>,
    pub muted_until: Option<DateTime<Utc>>,
    pub archived: bool,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Timestamps are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author_id: IdentityId,
    pub text: String,
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for [`Database::send_message`](crate::Database::send_message).
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub conversation_id: ConversationId,
    pub author_id: IdentityId,
    pub text: &'a str,
    pub reply_to_id: Option<MessageId>,
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

/// One identity's emoji on one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub message_id: MessageId,
    pub identity_id: IdentityId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionToggled {
    pub conversation_id: ConversationId,
    pub added: bool,
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Metadata for a file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: MessageId,
    pub file_name: String,
    pub url: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// One row of an identity's inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboxEntry {
    pub conversation: Conversation,
    pub unread_count: u64,
    pub muted_until: Option<DateTime<Utc>>,
}

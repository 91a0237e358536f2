//! WebSocket wire protocol.
//!
//! Every frame is a JSON text frame. Inbound frames carry a `type` tag and an
//! optional `requestId` that is echoed back in the matching reply. Outbound
//! frames are either a `reply` to one request or an `event` envelope
//! published on a topic.
//!
//! The same event can arrive twice (once on the conversation topic, once on
//! the personal channel). Both copies share `eventId`; clients deduplicate
//! on it, or on the entity ids inside the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, ProtocolError};
use crate::types::{ConversationId, IdentityId, MessageId, StaffId, Topic};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One request read off a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub request: ClientRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    JoinTopic(ConversationRef),
    LeaveTopic(ConversationRef),
    SendMessage(SendMessage),
    EditMessage(EditMessage),
    DeleteMessage(MessageRef),
    SetTyping(SetTyping),
    MarkRead(ConversationRef),
    ToggleReaction(ToggleReaction),
    QueryOnline,
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinTopic(_) => "join-topic",
            Self::LeaveTopic(_) => "leave-topic",
            Self::SendMessage(_) => "send-message",
            Self::EditMessage(_) => "edit-message",
            Self::DeleteMessage(_) => "delete-message",
            Self::SetTyping(_) => "set-typing",
            Self::MarkRead(_) => "mark-read",
            Self::ToggleReaction(_) => "toggle-reaction",
            Self::QueryOnline => "query-online",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub conversation_id: ConversationId,
    pub text: String,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTyping {
    pub conversation_id: ConversationId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleReaction {
    pub message_id: MessageId,
    pub emoji: String,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Reply(Reply),
    Event(EventEnvelope),
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Response to a single request, sent only to the requesting connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_ids: Option<Vec<IdentityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl Reply {
    pub fn ok(request_id: Option<String>) -> Self {
        Self {
            request_id,
            success: true,
            ..Self::default()
        }
    }

    pub fn message(request_id: Option<String>, message: MessageView) -> Self {
        Self {
            message: Some(message),
            ..Self::ok(request_id)
        }
    }

    pub fn toggled(request_id: Option<String>, added: bool) -> Self {
        Self {
            added: Some(added),
            ..Self::ok(request_id)
        }
    }

    pub fn online(request_id: Option<String>, online_ids: Vec<IdentityId>) -> Self {
        Self {
            online_ids: Some(online_ids),
            ..Self::ok(request_id)
        }
    }

    pub fn failed(request_id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
            ..Self::default()
        }
    }
}

/// An event as published on one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Shared by every copy of the same publication.
    pub event_id: Uuid,
    pub topic: String,
    pub event: ServerEvent,
}

impl EventEnvelope {
    pub fn new(event_id: Uuid, topic: Topic, event: ServerEvent) -> Self {
        Self {
            event_id,
            topic: topic.to_string(),
            event,
        }
    }

    /// Envelope for events sent to every live connection (presence).
    pub fn global(event_id: Uuid, event: ServerEvent) -> Self {
        Self {
            event_id,
            topic: GLOBAL_TOPIC.to_string(),
            event,
        }
    }
}

/// Topic name carried by globally broadcast envelopes.
pub const GLOBAL_TOPIC: &str = "global";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    MessageCreated(MessageView),
    ConversationUpdated(ConversationUpdate),
    MessageEdited(MessageView),
    MessageDeleted(MessageRemoved),
    ReactionChanged(ReactionChange),
    ReadReceipt(ReadReceipt),
    TypingStart(TypingNotice),
    TypingStop(TypingNotice),
    IdentityOnline(PresenceNotice),
    IdentityOffline(PresenceNotice),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "message-created",
            Self::ConversationUpdated(_) => "conversation-updated",
            Self::MessageEdited(_) => "message-edited",
            Self::MessageDeleted(_) => "message-deleted",
            Self::ReactionChanged(_) => "reaction-changed",
            Self::ReadReceipt(_) => "read-receipt",
            Self::TypingStart(_) => "typing-start",
            Self::TypingStop(_) => "typing-stop",
            Self::IdentityOnline(_) => "identity-online",
            Self::IdentityOffline(_) => "identity-offline",
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A message with everything a client needs to render it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author: AuthorView,
    /// Empty once the message is deleted.
    pub text: String,
    pub reply_to: Option<ReplyPreview>,
    pub attachments: Vec<AttachmentView>,
    pub reactions: Vec<ReactionSummary>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorView {
    pub id: IdentityId,
    pub staff_id: Option<StaffId>,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: MessageId,
    pub author_id: IdentityId,
    pub text: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub id: Uuid,
    pub file_name: String,
    pub url: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub identity_ids: Vec<IdentityId>,
}

/// Inbox refresh after new activity in a conversation, or after its latest
/// message was edited or deleted. A deleted latest message has no preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUpdate {
    pub conversation_id: ConversationId,
    pub last_message_id: MessageId,
    pub author_id: IdentityId,
    pub preview: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRemoved {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionChange {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub identity_id: IdentityId,
    pub emoji: String,
    pub added: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub identity_id: IdentityId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub conversation_id: ConversationId,
    pub identity_id: IdentityId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub identity_id: IdentityId,
}

/// Truncate to at most `max_chars` characters, never splitting a code point.
pub fn preview_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_send_message() {
        let conversation = ConversationId::new();
        let raw = format!(
            r#"{{"type":"send-message","requestId":"r1","conversationId":"{conversation}","text":"hello"}}"#
        );

        let frame = InboundFrame::decode(&raw).unwrap();
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
        match frame.request {
            ClientRequest::SendMessage(req) => {
                assert_eq!(req.conversation_id, conversation);
                assert_eq!(req.text, "hello");
                assert!(req.reply_to_id.is_none());
            }
            other => panic!("unexpected request: {}", other.name()),
        }
    }

    #[test]
    fn test_decode_query_online_without_request_id() {
        let frame = InboundFrame::decode(r#"{"type":"query-online"}"#).unwrap();
        assert!(frame.request_id.is_none());
        assert!(matches!(frame.request, ClientRequest::QueryOnline));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(InboundFrame::decode(r#"{"type":"drop-tables"}"#).is_err());
        assert!(InboundFrame::decode("not json").is_err());
    }

    #[test]
    fn test_reply_shape() {
        let reply = ServerFrame::Reply(Reply::toggled(Some("7".into()), true));
        let value: serde_json::Value = serde_json::from_str(&reply.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "reply");
        assert_eq!(value["requestId"], "7");
        assert_eq!(value["success"], true);
        assert_eq!(value["added"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failed_reply_shape() {
        let reply = ServerFrame::Reply(Reply::failed(None, ErrorCode::NotAParticipant, "nope"));
        let value: serde_json::Value = serde_json::from_str(&reply.encode().unwrap()).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "not-a-participant");
    }

    #[test]
    fn test_event_envelope_shape() {
        let identity = IdentityId::new();
        let event_id = Uuid::new_v4();
        let frame = ServerFrame::Event(EventEnvelope::new(
            event_id,
            Topic::Personal(identity),
            ServerEvent::IdentityOnline(PresenceNotice { identity_id: identity }),
        ));
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["eventId"], event_id.to_string());
        assert_eq!(value["topic"], format!("personal:{identity}"));
        assert_eq!(value["event"]["name"], "identity-online");
        assert_eq!(value["event"]["data"]["identityId"], identity.to_string());
    }

    #[test]
    fn test_preview_text_respects_char_boundaries() {
        assert_eq!(preview_text("hello", 10), "hello");
        assert_eq!(preview_text("hello", 3), "hel");
        assert_eq!(preview_text("héllo wörld", 4), "héll");
        assert_eq!(preview_text("👍👍👍", 2), "👍👍");
        assert_eq!(preview_text("", 5), "");
    }
}

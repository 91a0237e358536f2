//! Messages, attachments, and the hydrated message view.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use huddle_shared::constants::{MAX_MESSAGE_BYTES, PREVIEW_MAX_CHARS, REPLY_PREVIEW_MAX_CHARS};
use huddle_shared::protocol::{preview_text, AttachmentView, AuthorView, MessageView, ReplyPreview};
use huddle_shared::types::{ConversationId, IdentityId, MessageId};

use crate::codec::{next_after, now, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::conversations::ensure_participant;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, Message, NewMessage};
use crate::receipts::advance_cursor;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, author_id, body, reply_to_id, created_at, edited_at, deleted_at";

/// Shown when an author has no staff profile any more.
const UNKNOWN_AUTHOR: &str = "Unknown";

impl Database {
    /// Persist a new message.
    ///
    /// One transaction covers the participancy check, the insert, the
    /// conversation's last-activity summary, and the sender's read cursor.
    /// Either all of it lands or none of it does.
    pub fn send_message(&mut self, new: &NewMessage<'_>) -> Result<Message> {
        validate_text(new.text)?;

        let tx = self.write_tx()?;
        ensure_participant(&tx, new.conversation_id, new.author_id)?;

        if let Some(reply_to) = new.reply_to_id {
            let target: Option<String> = tx
                .query_row(
                    "SELECT conversation_id FROM messages WHERE id = ?1",
                    params![reply_to.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if target.as_deref() != Some(new.conversation_id.to_string().as_str()) {
                return Err(StoreError::NotFound);
            }
        }

        let last: Option<String> = tx.query_row(
            "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
            params![new.conversation_id.to_string()],
            |row| row.get(0),
        )?;
        let created_at = next_after(now(), parse_opt_ts(0, last)?);

        let message = Message {
            id: MessageId::new(),
            conversation_id: new.conversation_id,
            author_id: new.author_id,
            text: new.text.to_string(),
            reply_to_id: new.reply_to_id,
            created_at,
            edited_at: None,
            deleted_at: None,
        };

        tx.execute(
            "INSERT INTO messages (id, conversation_id, author_id, body, reply_to_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.author_id.to_string(),
                message.text,
                message.reply_to_id.map(|id| id.to_string()),
                ts(&message.created_at),
            ],
        )?;

        tx.execute(
            "UPDATE conversations
             SET last_activity_at = ?2, last_message_id = ?3, last_preview = ?4
             WHERE id = ?1",
            params![
                message.conversation_id.to_string(),
                ts(&message.created_at),
                message.id.to_string(),
                preview_text(&message.text, PREVIEW_MAX_CHARS),
            ],
        )?;

        advance_cursor(&tx, message.conversation_id, message.author_id, message.created_at)?;
        tx.commit()?;

        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        get_message(self.conn(), id)
    }

    /// A page of history in display order (oldest first). `before` pages
    /// backwards from an exclusive timestamp.
    pub fn list_messages(
        &self,
        conversation: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
             ORDER BY created_at DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation.to_string(), before.as_ref().map(ts), limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Replace the text of a message. Only its author may do this, and only
    /// while the message is not deleted.
    pub fn edit_message(&mut self, id: MessageId, editor: IdentityId, text: &str) -> Result<Message> {
        validate_text(text)?;

        let tx = self.write_tx()?;
        let mut message = modifiable_message(&tx, id, editor)?;

        let edited_at = next_after(now(), Some(message.created_at));
        tx.execute(
            "UPDATE messages SET body = ?2, edited_at = ?3 WHERE id = ?1",
            params![id.to_string(), text, ts(&edited_at)],
        )?;
        tx.execute(
            "UPDATE conversations SET last_preview = ?2
             WHERE id = ?1 AND last_message_id = ?3",
            params![
                message.conversation_id.to_string(),
                preview_text(text, PREVIEW_MAX_CHARS),
                id.to_string(),
            ],
        )?;
        tx.commit()?;

        message.text = text.to_string();
        message.edited_at = Some(edited_at);
        Ok(message)
    }

    /// Soft-delete a message: the row stays so replies and ordering survive,
    /// but its text is cleared.
    pub fn delete_message(&mut self, id: MessageId, actor: IdentityId) -> Result<Message> {
        let tx = self.write_tx()?;
        let mut message = modifiable_message(&tx, id, actor)?;

        let deleted_at = next_after(now(), Some(message.created_at));
        tx.execute(
            "UPDATE messages SET body = '', deleted_at = ?2 WHERE id = ?1",
            params![id.to_string(), ts(&deleted_at)],
        )?;
        tx.execute(
            "UPDATE conversations SET last_preview = NULL
             WHERE id = ?1 AND last_message_id = ?2",
            params![message.conversation_id.to_string(), id.to_string()],
        )?;
        tx.commit()?;

        message.text.clear();
        message.deleted_at = Some(deleted_at);
        Ok(message)
    }

    /// Attach file metadata to a message. Only the author may attach.
    pub fn add_attachment(
        &mut self,
        message_id: MessageId,
        uploader: IdentityId,
        file_name: &str,
        url: &str,
        size_bytes: i64,
    ) -> Result<Attachment> {
        if file_name.trim().is_empty() || url.trim().is_empty() || size_bytes < 0 {
            return Err(StoreError::Invalid("attachment metadata is incomplete".into()));
        }

        let tx = self.write_tx()?;
        modifiable_message(&tx, message_id, uploader)?;

        let attachment = Attachment {
            id: Uuid::new_v4(),
            message_id,
            file_name: file_name.to_string(),
            url: url.to_string(),
            size_bytes,
            created_at: now(),
        };
        tx.execute(
            "INSERT INTO attachments (id, message_id, file_name, url, size_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attachment.id.to_string(),
                attachment.message_id.to_string(),
                attachment.file_name,
                attachment.url,
                attachment.size_bytes,
                ts(&attachment.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(attachment)
    }

    pub fn attachments_for(&self, message_id: MessageId) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, file_name, url, size_bytes, created_at
             FROM attachments WHERE message_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let message_str: String = row.get(1)?;
            let created_str: String = row.get(5)?;
            Ok(Attachment {
                id: parse_uuid(0, &id_str)?,
                message_id: MessageId(parse_uuid(1, &message_str)?),
                file_name: row.get(2)?,
                url: row.get(3)?,
                size_bytes: row.get(4)?,
                created_at: parse_ts(5, &created_str)?,
            })
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    /// Build the client-facing view of a message: author profile, reply
    /// preview, attachments, and reaction summaries.
    pub fn hydrate_message(&self, message: &Message) -> Result<MessageView> {
        let profile = self.staff_profile(message.author_id)?;
        let author = AuthorView {
            id: message.author_id,
            staff_id: profile.as_ref().map(|p| p.staff_id),
            display_name: profile
                .map(|p| p.display_name)
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        };

        let reply_to = match message.reply_to_id {
            Some(id) => get_message(self.conn(), id)
                .map(|target| {
                    Some(ReplyPreview {
                        id: target.id,
                        author_id: target.author_id,
                        text: preview_text(&target.text, REPLY_PREVIEW_MAX_CHARS),
                        deleted: target.is_deleted(),
                    })
                })
                .or_else(|e| match e {
                    StoreError::NotFound => Ok(None),
                    other => Err(other),
                })?,
            None => None,
        };

        let attachments = self
            .attachments_for(message.id)?
            .into_iter()
            .map(|a| AttachmentView {
                id: a.id,
                file_name: a.file_name,
                url: a.url,
                size_bytes: a.size_bytes,
            })
            .collect();

        Ok(MessageView {
            id: message.id,
            conversation_id: message.conversation_id,
            author,
            text: message.text.clone(),
            reply_to,
            attachments,
            reactions: self.reaction_summaries(message.id)?,
            created_at: message.created_at,
            edited_at: message.edited_at,
            deleted: message.is_deleted(),
        })
    }
}

fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(StoreError::Invalid("message text is empty".into()));
    }
    if text.len() > MAX_MESSAGE_BYTES {
        return Err(StoreError::Invalid(format!(
            "message text exceeds {MAX_MESSAGE_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Load a message that `actor` is allowed to change: they are still a
/// participant, they wrote it, and it is not deleted.
fn modifiable_message(conn: &Connection, id: MessageId, actor: IdentityId) -> Result<Message> {
    let message = get_message(conn, id)?;
    ensure_participant(conn, message.conversation_id, actor)?;
    if message.author_id != actor {
        return Err(StoreError::NotAuthor);
    }
    if message.is_deleted() {
        return Err(StoreError::Invalid("message was deleted".into()));
    }
    Ok(message)
}

pub(crate) fn get_message(conn: &Connection, id: MessageId) -> Result<Message> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id.to_string()],
        row_to_message,
    )
    .map_err(StoreError::from_lookup)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let author_str: String = row.get(2)?;
    let created_str: String = row.get(5)?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        conversation_id: ConversationId(parse_uuid(1, &conversation_str)?),
        author_id: IdentityId(parse_uuid(2, &author_str)?),
        text: row.get(3)?,
        reply_to_id: parse_opt_uuid(4, row.get(4)?)?.map(MessageId),
        created_at: parse_ts(5, &created_str)?,
        edited_at: parse_opt_ts(6, row.get(6)?)?,
        deleted_at: parse_opt_ts(7, row.get(7)?)?,
    })
}

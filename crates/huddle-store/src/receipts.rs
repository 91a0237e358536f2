//! Read cursors and unread counts.
//!
//! A participant's read cursor is a timestamp: every message created at or
//! before it counts as read. Cursors only ever move forward.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use huddle_shared::types::{ConversationId, IdentityId};

use crate::codec::{now, parse_opt_ts, ts};
use crate::conversations::ensure_participant;
use crate::database::Database;
use crate::error::{Result, StoreError};

/// Unread predicate over `messages m` joined to `participants p`: messages by
/// someone else, not deleted, newer than the cursor.
pub(crate) const UNREAD_FILTER: &str = "m.author_id != p.identity_id
     AND m.deleted_at IS NULL
     AND (p.read_cursor IS NULL OR m.created_at > p.read_cursor)";

impl Database {
    /// Mark everything currently in the conversation as read for `identity`.
    ///
    /// The cursor becomes the later of now and the newest message timestamp,
    /// so messages stamped slightly ahead of the clock are covered too.
    /// Returns the resulting cursor.
    pub fn mark_read(
        &mut self,
        identity: IdentityId,
        conversation: ConversationId,
    ) -> Result<DateTime<Utc>> {
        let tx = self.write_tx()?;
        ensure_participant(&tx, conversation, identity)?;

        let latest: Option<String> = tx.query_row(
            "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
            params![conversation.to_string()],
            |row| row.get(0),
        )?;
        let current = now();
        let target = match parse_opt_ts(0, latest)? {
            Some(latest) if latest > current => latest,
            _ => current,
        };

        advance_cursor(&tx, conversation, identity, target)?;
        let cursor = read_cursor(&tx, conversation, identity)?.unwrap_or(target);
        tx.commit()?;
        Ok(cursor)
    }

    /// Unread messages for `identity` in one conversation.
    pub fn unread_count(&self, identity: IdentityId, conversation: ConversationId) -> Result<u64> {
        ensure_participant(self.conn(), conversation, identity)?;
        let count: i64 = self.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM participants p
                 JOIN messages m ON m.conversation_id = p.conversation_id
                 WHERE p.conversation_id = ?1 AND p.identity_id = ?2 AND {UNREAD_FILTER}"
            ),
            params![conversation.to_string(), identity.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Unread messages across every non-archived conversation of `identity`.
    pub fn total_unread(&self, identity: IdentityId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM participants p
                 JOIN messages m ON m.conversation_id = p.conversation_id
                 WHERE p.identity_id = ?1 AND p.archived = 0 AND {UNREAD_FILTER}"
            ),
            params![identity.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Move the cursor forward to `at`. Never moves it backwards.
pub(crate) fn advance_cursor(
    conn: &Connection,
    conversation: ConversationId,
    identity: IdentityId,
    at: DateTime<Utc>,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE participants
         SET read_cursor = CASE
             WHEN read_cursor IS NULL OR read_cursor < ?3 THEN ?3
             ELSE read_cursor
         END
         WHERE conversation_id = ?1 AND identity_id = ?2",
        params![conversation.to_string(), identity.to_string(), ts(&at)],
    )?;
    if affected == 0 {
        return Err(StoreError::NotAParticipant);
    }
    Ok(())
}

fn read_cursor(
    conn: &Connection,
    conversation: ConversationId,
    identity: IdentityId,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT read_cursor FROM participants WHERE conversation_id = ?1 AND identity_id = ?2",
            params![conversation.to_string(), identity.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(parse_opt_ts(0, raw.flatten())?)
}

//! Conversations and their participants.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use huddle_shared::types::{ConversationId, ConversationKind, IdentityId, MessageId};

use crate::codec::{now, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Conversation, InboxEntry, Participant};
use crate::receipts::UNREAD_FILTER;

pub(crate) const CONVERSATION_COLUMNS: &str =
    "c.id, c.kind, c.title, c.created_at, c.last_activity_at, c.last_message_id, c.last_preview";

const PARTICIPANT_COLUMNS: &str =
    "conversation_id, identity_id, joined_at, read_cursor, muted_until, archived";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the direct conversation between `a` and `b`, creating it on
    /// first use. At most one exists per unordered pair.
    pub fn find_or_create_direct(&mut self, a: IdentityId, b: IdentityId) -> Result<Conversation> {
        if a == b {
            return Err(StoreError::Invalid(
                "a direct conversation needs two distinct participants".into(),
            ));
        }
        let key = direct_key(a, b);

        let tx = self.write_tx()?;
        let existing = tx
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.direct_key = ?1"),
                params![key],
                row_to_conversation,
            )
            .optional()?;

        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let conversation = Conversation {
            id: ConversationId::new(),
            kind: ConversationKind::Direct,
            title: None,
            created_at: now(),
            last_activity_at: None,
            last_message_id: None,
            last_preview: None,
        };
        insert_conversation(&tx, &conversation, Some(&key))?;
        insert_participant(&tx, conversation.id, a, conversation.created_at)?;
        insert_participant(&tx, conversation.id, b, conversation.created_at)?;
        tx.commit()?;

        tracing::debug!(conversation = %conversation.id, "created direct conversation");
        Ok(conversation)
    }

    /// Create a group conversation. The creator is always a member;
    /// duplicate member ids are ignored.
    pub fn create_group(
        &mut self,
        title: &str,
        creator: IdentityId,
        members: &[IdentityId],
    ) -> Result<Conversation> {
        let conversation = Conversation {
            id: ConversationId::new(),
            kind: ConversationKind::Group,
            title: Some(title.trim().to_string()).filter(|t| !t.is_empty()),
            created_at: now(),
            last_activity_at: None,
            last_message_id: None,
            last_preview: None,
        };

        let tx = self.write_tx()?;
        insert_conversation(&tx, &conversation, None)?;
        for identity in std::iter::once(&creator).chain(members) {
            insert_participant(&tx, conversation.id, *identity, conversation.created_at)?;
        }
        tx.commit()?;

        tracing::debug!(
            conversation = %conversation.id,
            members = members.len() + 1,
            "created group conversation"
        );
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        get_conversation(self.conn(), id)
    }

    /// Participant ids in join order.
    pub fn participant_ids(&self, conversation: ConversationId) -> Result<Vec<IdentityId>> {
        participant_ids(self.conn(), conversation)
    }

    pub fn participant(
        &self,
        conversation: ConversationId,
        identity: IdentityId,
    ) -> Result<Participant> {
        ensure_participant(self.conn(), conversation, identity)?;
        Ok(self.conn().query_row(
            &format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE conversation_id = ?1 AND identity_id = ?2"
            ),
            params![conversation.to_string(), identity.to_string()],
            row_to_participant,
        )?)
    }

    pub fn is_participant(&self, conversation: ConversationId, identity: IdentityId) -> Result<bool> {
        match ensure_participant(self.conn(), conversation, identity) {
            Ok(()) => Ok(true),
            Err(StoreError::NotAParticipant) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Non-archived conversations of `identity`, most recent activity first,
    /// each with its unread count.
    pub fn inbox_for(&self, identity: IdentityId) -> Result<Vec<InboxEntry>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS}, p.muted_until,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id AND {UNREAD_FILTER})
             FROM participants p
             JOIN conversations c ON c.id = p.conversation_id
             WHERE p.identity_id = ?1 AND p.archived = 0
             ORDER BY COALESCE(c.last_activity_at, c.created_at) DESC"
        ))?;

        let rows = stmt.query_map(params![identity.to_string()], |row| {
            let conversation = row_to_conversation(row)?;
            let muted_until = parse_opt_ts(7, row.get(7)?)?;
            let unread: i64 = row.get(8)?;
            Ok(InboxEntry {
                conversation,
                unread_count: unread as u64,
                muted_until,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Add `identity` to a group conversation on behalf of `actor`, who must
    /// already be a member. Returns `false` when already a member.
    pub fn add_participant(
        &mut self,
        conversation: ConversationId,
        actor: IdentityId,
        identity: IdentityId,
    ) -> Result<bool> {
        let tx = self.write_tx()?;
        ensure_participant(&tx, conversation, actor)?;
        require_group(&tx, conversation)?;

        let added = tx.execute(
            "INSERT OR IGNORE INTO participants (conversation_id, identity_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![conversation.to_string(), identity.to_string(), ts(&now())],
        )? > 0;
        tx.commit()?;
        Ok(added)
    }

    /// Remove `identity` from a group conversation on behalf of `actor`.
    /// The last member can never be removed.
    pub fn remove_participant(
        &mut self,
        conversation: ConversationId,
        actor: IdentityId,
        identity: IdentityId,
    ) -> Result<bool> {
        let tx = self.write_tx()?;
        ensure_participant(&tx, conversation, actor)?;
        require_group(&tx, conversation)?;

        let members = participant_ids(&tx, conversation)?;
        if !members.contains(&identity) {
            return Ok(false);
        }
        if members.len() == 1 {
            return Err(StoreError::Invalid(
                "a group conversation keeps at least one participant".into(),
            ));
        }

        tx.execute(
            "DELETE FROM participants WHERE conversation_id = ?1 AND identity_id = ?2",
            params![conversation.to_string(), identity.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Mute notifications until the given instant (`None` unmutes).
    pub fn set_muted_until(
        &self,
        conversation: ConversationId,
        identity: IdentityId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE participants SET muted_until = ?3
             WHERE conversation_id = ?1 AND identity_id = ?2",
            params![
                conversation.to_string(),
                identity.to_string(),
                until.as_ref().map(ts),
            ],
        )?;
        expect_membership_row(self.conn(), affected, conversation, identity)
    }

    pub fn set_archived(
        &self,
        conversation: ConversationId,
        identity: IdentityId,
        archived: bool,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE participants SET archived = ?3
             WHERE conversation_id = ?1 AND identity_id = ?2",
            params![conversation.to_string(), identity.to_string(), archived],
        )?;
        expect_membership_row(self.conn(), affected, conversation, identity)
    }
}

// ----------------------------------------------------------------------
// Helpers shared with the other modules
// ----------------------------------------------------------------------

/// Fails with `NotFound` when the conversation does not exist and with
/// `NotAParticipant` when `identity` is not a member.
pub(crate) fn ensure_participant(
    conn: &Connection,
    conversation: ConversationId,
    identity: IdentityId,
) -> Result<()> {
    let membership: Option<Option<i64>> = conn
        .query_row(
            "SELECT (SELECT 1 FROM participants
                     WHERE conversation_id = ?1 AND identity_id = ?2)
             FROM conversations WHERE id = ?1",
            params![conversation.to_string(), identity.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match membership {
        None => Err(StoreError::NotFound),
        Some(None) => Err(StoreError::NotAParticipant),
        Some(Some(_)) => Ok(()),
    }
}

pub(crate) fn get_conversation(conn: &Connection, id: ConversationId) -> Result<Conversation> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1"),
        params![id.to_string()],
        row_to_conversation,
    )
    .map_err(StoreError::from_lookup)
}

pub(crate) fn participant_ids(conn: &Connection, conversation: ConversationId) -> Result<Vec<IdentityId>> {
    let mut stmt = conn.prepare(
        "SELECT identity_id FROM participants
         WHERE conversation_id = ?1
         ORDER BY joined_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![conversation.to_string()], |row| {
        let s: String = row.get(0)?;
        Ok(IdentityId(parse_uuid(0, &s)?))
    })?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

fn require_group(conn: &Connection, conversation: ConversationId) -> Result<()> {
    match get_conversation(conn, conversation)?.kind {
        ConversationKind::Group => Ok(()),
        ConversationKind::Direct => Err(StoreError::Invalid(
            "direct conversations have a fixed participant pair".into(),
        )),
    }
}

fn expect_membership_row(
    conn: &Connection,
    affected: usize,
    conversation: ConversationId,
    identity: IdentityId,
) -> Result<()> {
    if affected > 0 {
        Ok(())
    } else {
        // Distinguish a missing conversation from a missing membership.
        ensure_participant(conn, conversation, identity)
    }
}

fn direct_key(a: IdentityId, b: IdentityId) -> String {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

fn insert_conversation(conn: &Connection, c: &Conversation, direct_key: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, kind, title, direct_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            c.id.to_string(),
            c.kind.as_str(),
            c.title,
            direct_key,
            ts(&c.created_at),
        ],
    )?;
    Ok(())
}

fn insert_participant(
    conn: &Connection,
    conversation: ConversationId,
    identity: IdentityId,
    joined_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO participants (conversation_id, identity_id, joined_at)
         VALUES (?1, ?2, ?3)",
        params![conversation.to_string(), identity.to_string(), ts(&joined_at)],
    )?;
    Ok(())
}

/// Expects the columns in [`CONVERSATION_COLUMNS`] order.
pub(crate) fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let created_str: String = row.get(3)?;

    let kind = ConversationKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown conversation kind: {kind_str}").into(),
        )
    })?;

    Ok(Conversation {
        id: ConversationId(parse_uuid(0, &id_str)?),
        kind,
        title: row.get(2)?,
        created_at: parse_ts(3, &created_str)?,
        last_activity_at: parse_opt_ts(4, row.get(4)?)?,
        last_message_id: parse_opt_uuid(5, row.get(5)?)?.map(MessageId),
        last_preview: row.get(6)?,
    })
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let conversation_str: String = row.get(0)?;
    let identity_str: String = row.get(1)?;
    let joined_str: String = row.get(2)?;

    Ok(Participant {
        conversation_id: ConversationId(parse_uuid(0, &conversation_str)?),
        identity_id: IdentityId(parse_uuid(1, &identity_str)?),
        joined_at: parse_ts(2, &joined_str)?,
        read_cursor: parse_opt_ts(3, row.get(3)?)?,
        muted_until: parse_opt_ts(4, row.get(4)?)?,
        archived: row.get(5)?,
    })
}

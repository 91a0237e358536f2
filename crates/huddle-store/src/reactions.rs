use rusqlite::params;

use huddle_shared::constants::MAX_EMOJI_BYTES;
use huddle_shared::protocol::ReactionSummary;
use huddle_shared::types::{IdentityId, MessageId};

use crate::codec::{now, parse_ts, parse_uuid, ts};
use crate::conversations::ensure_participant;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::get_message;
use crate::models::{Reaction, ReactionToggled};

impl Database {
    /// Add the reaction if absent, remove it if present.
    ///
    /// Runs as one IMMEDIATE transaction so two concurrent toggles by the
    /// same identity serialize instead of both inserting.
    pub fn toggle_reaction(
        &mut self,
        message_id: MessageId,
        identity: IdentityId,
        emoji: &str,
    ) -> Result<ReactionToggled> {
        if emoji.is_empty() || emoji.len() > MAX_EMOJI_BYTES {
            return Err(StoreError::Invalid(format!(
                "emoji must be 1..={MAX_EMOJI_BYTES} bytes"
            )));
        }

        let tx = self.write_tx()?;
        let message = get_message(&tx, message_id)?;
        ensure_participant(&tx, message.conversation_id, identity)?;
        if message.is_deleted() {
            return Err(StoreError::Invalid("message was deleted".into()));
        }

        let removed = tx.execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND identity_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), identity.to_string(), emoji],
        )?;
        if removed == 0 {
            tx.execute(
                "INSERT INTO reactions (message_id, identity_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![message_id.to_string(), identity.to_string(), emoji, ts(&now())],
            )?;
        }
        tx.commit()?;

        Ok(ReactionToggled {
            conversation_id: message.conversation_id,
            added: removed == 0,
        })
    }

    /// All reactions on a message, oldest first.
    pub fn reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, identity_id, emoji, created_at
             FROM reactions WHERE message_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let message_str: String = row.get(0)?;
            let identity_str: String = row.get(1)?;
            let created_str: String = row.get(3)?;
            Ok(Reaction {
                message_id: MessageId(parse_uuid(0, &message_str)?),
                identity_id: IdentityId(parse_uuid(1, &identity_str)?),
                emoji: row.get(2)?,
                created_at: parse_ts(3, &created_str)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }

    /// Reactions grouped by emoji, in order of each emoji's first use.
    pub fn reaction_summaries(&self, message_id: MessageId) -> Result<Vec<ReactionSummary>> {
        let mut summaries: Vec<ReactionSummary> = Vec::new();
        for reaction in self.reactions_for_message(message_id)? {
            match summaries.iter_mut().find(|s| s.emoji == reaction.emoji) {
                Some(summary) => {
                    summary.count += 1;
                    summary.identity_ids.push(reaction.identity_id);
                }
                None => summaries.push(ReactionSummary {
                    emoji: reaction.emoji,
                    count: 1,
                    identity_ids: vec![reaction.identity_id],
                }),
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use huddle_shared::types::ConversationId;

    fn setup() -> (Database, IdentityId, IdentityId, ConversationId, MessageId) {
        let mut db = Database::open_in_memory().unwrap();
        let (a, b) = (IdentityId::new(), IdentityId::new());
        let conversation = db.find_or_create_direct(a, b).unwrap().id;
        let message = db
            .send_message(&NewMessage {
                conversation_id: conversation,
                author_id: a,
                text: "ship it?",
                reply_to_id: None,
            })
            .unwrap();
        (db, a, b, conversation, message.id)
    }

    #[test]
    fn toggling_twice_restores_state() {
        let (mut db, a, _, conversation, message) = setup();

        let first = db.toggle_reaction(message, a, "🎉").unwrap();
        assert_eq!(first, ReactionToggled { conversation_id: conversation, added: true });
        assert_eq!(db.reactions_for_message(message).unwrap().len(), 1);

        let second = db.toggle_reaction(message, a, "🎉").unwrap();
        assert!(!second.added);
        assert!(db.reactions_for_message(message).unwrap().is_empty());
    }

    #[test]
    fn identities_toggle_independently() {
        let (mut db, a, b, _, message) = setup();

        assert!(db.toggle_reaction(message, a, "👍").unwrap().added);
        assert!(db.toggle_reaction(message, b, "👍").unwrap().added);
        assert!(!db.toggle_reaction(message, a, "👍").unwrap().added);

        let summaries = db.reaction_summaries(message).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].count, 1);
        assert_eq!(summaries[0].identity_ids, vec![b]);
    }

    #[test]
    fn summaries_group_by_emoji_in_first_use_order() {
        let (mut db, a, b, _, message) = setup();

        db.toggle_reaction(message, a, "👀").unwrap();
        db.toggle_reaction(message, b, "✅").unwrap();
        db.toggle_reaction(message, b, "👀").unwrap();

        let summaries = db.reaction_summaries(message).unwrap();
        let emojis: Vec<_> = summaries.iter().map(|s| s.emoji.as_str()).collect();
        assert_eq!(emojis, ["👀", "✅"]);
        assert_eq!(summaries[0].identity_ids, vec![a, b]);
    }

    #[test]
    fn rejects_invalid_emoji_and_outsiders() {
        let (mut db, a, _, _, message) = setup();

        assert!(matches!(db.toggle_reaction(message, a, ""), Err(StoreError::Invalid(_))));
        let long = "x".repeat(MAX_EMOJI_BYTES + 1);
        assert!(matches!(db.toggle_reaction(message, a, &long), Err(StoreError::Invalid(_))));
        assert!(matches!(
            db.toggle_reaction(message, IdentityId::new(), "👍"),
            Err(StoreError::NotAParticipant)
        ));
        assert!(matches!(
            db.toggle_reaction(MessageId::new(), a, "👍"),
            Err(StoreError::NotFound)
        ));
    }
}

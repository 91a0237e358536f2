//! Read receipts.
//!
//! Marking a conversation read advances the reader's cursor and tells the
//! other participants, so their "seen" indicators update live. The reader's
//! own personal channel is skipped; their other tabs still see the receipt
//! if they have the conversation open.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use huddle_shared::protocol::{ReadReceipt, ServerEvent};
use huddle_shared::types::{ConversationId, IdentityId};

use crate::error::ChatError;
use crate::router::ChannelRouter;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct ReceiptTracker {
    store: SharedStore,
    router: Arc<ChannelRouter>,
}

impl ReceiptTracker {
    pub fn new(store: SharedStore, router: Arc<ChannelRouter>) -> Self {
        Self { store, router }
    }

    pub async fn mark_read(
        &self,
        identity: IdentityId,
        conversation: ConversationId,
    ) -> Result<DateTime<Utc>, ChatError> {
        let (read_at, participants) = self
            .store
            .call(move |db| {
                let read_at = db.mark_read(identity, conversation)?;
                Ok((read_at, db.participant_ids(conversation)?))
            })
            .await?;

        debug!(%conversation, %identity, %read_at, "Conversation marked read");
        self.router.publish_to_conversation(
            conversation,
            &participants,
            ServerEvent::ReadReceipt(ReadReceipt {
                conversation_id: conversation,
                identity_id: identity,
                read_at,
            }),
            Some(identity),
        );
        Ok(read_at)
    }

    pub async fn unread_count(
        &self,
        identity: IdentityId,
        conversation: ConversationId,
    ) -> Result<u64, ChatError> {
        self.store
            .call(move |db| db.unread_count(identity, conversation))
            .await
    }

    pub async fn total_unread(&self, identity: IdentityId) -> Result<u64, ChatError> {
        self.store.call(move |db| db.total_unread(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::protocol::ServerFrame;
    use huddle_shared::types::ConnectionId;
    use huddle_store::{Database, NewMessage};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mark_read_clears_unread_and_notifies_others() {
        let store = SharedStore::new(Database::open_in_memory().unwrap());
        let router = Arc::new(ChannelRouter::new());
        let receipts = ReceiptTracker::new(store.clone(), router.clone());
        let (alice, bob) = (IdentityId::new(), IdentityId::new());

        let conversation = store
            .call(move |db| {
                let conversation = db.find_or_create_direct(alice, bob)?;
                for text in ["one", "two"] {
                    db.send_message(&NewMessage {
                        conversation_id: conversation.id,
                        author_id: alice,
                        text,
                        reply_to_id: None,
                    })?;
                }
                Ok(conversation.id)
            })
            .await
            .unwrap();

        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        router.attach(ConnectionId::new(), alice, alice_tx);
        router.attach(ConnectionId::new(), bob, bob_tx);

        assert_eq!(receipts.unread_count(bob, conversation).await.unwrap(), 2);
        assert_eq!(receipts.total_unread(bob).await.unwrap(), 2);

        let read_at = receipts.mark_read(bob, conversation).await.unwrap();
        assert_eq!(receipts.unread_count(bob, conversation).await.unwrap(), 0);

        let frame = alice_rx.try_recv().unwrap();
        match ServerFrame::decode(&frame).unwrap() {
            ServerFrame::Event(envelope) => match envelope.event {
                ServerEvent::ReadReceipt(receipt) => {
                    assert_eq!(receipt.identity_id, bob);
                    assert_eq!(receipt.read_at, read_at);
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn outsider_cannot_mark_read() {
        let store = SharedStore::new(Database::open_in_memory().unwrap());
        let receipts = ReceiptTracker::new(store.clone(), Arc::new(ChannelRouter::new()));
        let (alice, bob) = (IdentityId::new(), IdentityId::new());
        let conversation = store
            .call(move |db| db.find_or_create_direct(alice, bob))
            .await
            .unwrap()
            .id;

        let err = receipts
            .mark_read(IdentityId::new(), conversation)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));
    }
}

//! Message send, edit, and delete.
//!
//! The write happens first, inside one store transaction; only a committed
//! change is broadcast. A failure is returned to the caller and nothing is
//! published.

use std::sync::Arc;

use tracing::{debug, info};

use huddle_shared::constants::PREVIEW_MAX_CHARS;
use huddle_shared::protocol::{
    preview_text, ConversationUpdate, MessageRemoved, MessageView, ServerEvent,
};
use huddle_shared::types::{ConversationId, IdentityId, MessageId};
use huddle_store::{Database, Message, NewMessage};

use crate::error::ChatError;
use crate::router::ChannelRouter;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct MessageCoordinator {
    store: SharedStore,
    router: Arc<ChannelRouter>,
}

impl MessageCoordinator {
    pub fn new(store: SharedStore, router: Arc<ChannelRouter>) -> Self {
        Self { store, router }
    }

    pub async fn send(
        &self,
        author: IdentityId,
        conversation: ConversationId,
        text: String,
        reply_to: Option<MessageId>,
    ) -> Result<MessageView, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::BadRequest("message text is empty".into()));
        }

        let (view, participants) = self
            .store
            .call(move |db| {
                let message = db.send_message(&NewMessage {
                    conversation_id: conversation,
                    author_id: author,
                    text: &text,
                    reply_to_id: reply_to,
                })?;
                let view = db.hydrate_message(&message)?;
                let participants = db.participant_ids(conversation)?;
                Ok((view, participants))
            })
            .await?;

        info!(
            %conversation,
            message = %view.id,
            %author,
            "Message sent"
        );

        let update = ConversationUpdate {
            conversation_id: conversation,
            last_message_id: view.id,
            author_id: author,
            preview: Some(preview_text(&view.text, PREVIEW_MAX_CHARS)),
            last_activity_at: view.created_at,
        };
        self.router.publish_to_conversation(
            conversation,
            &participants,
            ServerEvent::MessageCreated(view.clone()),
            None,
        );
        self.router.publish_to_conversation(
            conversation,
            &participants,
            ServerEvent::ConversationUpdated(update),
            None,
        );

        Ok(view)
    }

    pub async fn edit(
        &self,
        editor: IdentityId,
        message: MessageId,
        text: String,
    ) -> Result<MessageView, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::BadRequest("message text is empty".into()));
        }

        let (view, update, participants) = self
            .store
            .call(move |db| {
                let edited = db.edit_message(message, editor, &text)?;
                let view = db.hydrate_message(&edited)?;
                let update = summary_update(db, &edited)?;
                let participants = db.participant_ids(edited.conversation_id)?;
                Ok((view, update, participants))
            })
            .await?;

        debug!(conversation = %view.conversation_id, %message, "Message edited");
        self.router.publish_to_conversation(
            view.conversation_id,
            &participants,
            ServerEvent::MessageEdited(view.clone()),
            None,
        );
        if let Some(update) = update {
            self.router.publish_to_conversation(
                view.conversation_id,
                &participants,
                ServerEvent::ConversationUpdated(update),
                None,
            );
        }
        Ok(view)
    }

    pub async fn delete(&self, actor: IdentityId, message: MessageId) -> Result<(), ChatError> {
        let (conversation, update, participants) = self
            .store
            .call(move |db| {
                let deleted = db.delete_message(message, actor)?;
                let update = summary_update(db, &deleted)?;
                let participants = db.participant_ids(deleted.conversation_id)?;
                Ok((deleted.conversation_id, update, participants))
            })
            .await?;

        debug!(%conversation, %message, "Message deleted");
        self.router.publish_to_conversation(
            conversation,
            &participants,
            ServerEvent::MessageDeleted(MessageRemoved {
                conversation_id: conversation,
                message_id: message,
            }),
            None,
        );
        if let Some(update) = update {
            self.router.publish_to_conversation(
                conversation,
                &participants,
                ServerEvent::ConversationUpdated(update),
                None,
            );
        }
        Ok(())
    }
}

/// The inbox summary after `message` changed, if it is still the
/// conversation's latest message.
fn summary_update(db: &Database, message: &Message) -> huddle_store::Result<Option<ConversationUpdate>> {
    let conversation = db.get_conversation(message.conversation_id)?;
    if conversation.last_message_id != Some(message.id) {
        return Ok(None);
    }
    Ok(Some(ConversationUpdate {
        conversation_id: conversation.id,
        last_message_id: message.id,
        author_id: message.author_id,
        preview: conversation.last_preview,
        last_activity_at: conversation.last_activity_at.unwrap_or(message.created_at),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::protocol::{EventEnvelope, ServerFrame};
    use huddle_shared::types::{ConnectionId, Topic};
    use huddle_store::Database;
    use tokio::sync::mpsc;

    struct Harness {
        coordinator: MessageCoordinator,
        router: Arc<ChannelRouter>,
        store: SharedStore,
        alice: IdentityId,
        bob: IdentityId,
        conversation: ConversationId,
    }

    async fn harness() -> Harness {
        let store = SharedStore::new(Database::open_in_memory().unwrap());
        let router = Arc::new(ChannelRouter::new());
        let (alice, bob) = (IdentityId::new(), IdentityId::new());
        let conversation = store
            .call(move |db| db.find_or_create_direct(alice, bob))
            .await
            .unwrap()
            .id;
        Harness {
            coordinator: MessageCoordinator::new(store.clone(), router.clone()),
            router,
            store,
            alice,
            bob,
            conversation,
        }
    }

    fn listen(router: &ChannelRouter, identity: IdentityId) -> mpsc::Receiver<std::sync::Arc<str>> {
        let (tx, rx) = mpsc::channel(16);
        router.attach(ConnectionId::new(), identity, tx);
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<std::sync::Arc<str>>) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Ok(ServerFrame::Event(envelope)) = ServerFrame::decode(&frame) {
                out.push(envelope);
            }
        }
        out
    }

    #[tokio::test]
    async fn send_publishes_created_then_updated() {
        let h = harness().await;
        let mut bob_rx = listen(&h.router, h.bob);

        let view = h
            .coordinator
            .send(h.alice, h.conversation, "hello".into(), None)
            .await
            .unwrap();
        assert_eq!(view.text, "hello");

        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic, Topic::Personal(h.bob).to_string());
        match &events[0].event {
            ServerEvent::MessageCreated(m) => assert_eq!(m.id, view.id),
            other => panic!("unexpected {other:?}"),
        }
        match &events[1].event {
            ServerEvent::ConversationUpdated(u) => {
                assert_eq!(u.last_message_id, view.id);
                assert_eq!(u.preview.as_deref(), Some("hello"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_send_publishes_nothing() {
        let h = harness().await;
        let mut bob_rx = listen(&h.router, h.bob);
        let outsider = IdentityId::new();

        let err = h
            .coordinator
            .send(outsider, h.conversation, "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));

        let err = h
            .coordinator
            .send(h.alice, h.conversation, "  ".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::BadRequest(_)));

        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn failed_write_publishes_nothing() {
        let h = harness().await;
        let mut bob_rx = listen(&h.router, h.bob);
        h.store
            .call(|db| {
                db.conn().execute_batch(
                    "CREATE TRIGGER fail_insert BEFORE INSERT ON messages
                     BEGIN SELECT RAISE(ABORT, 'induced failure'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = h
            .coordinator
            .send(h.alice, h.conversation, "lost".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PersistenceFailure(_)));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn edit_and_delete_fan_out() {
        let h = harness().await;
        let view = h
            .coordinator
            .send(h.alice, h.conversation, "draft".into(), None)
            .await
            .unwrap();
        let mut bob_rx = listen(&h.router, h.bob);

        let err = h
            .coordinator
            .edit(h.bob, view.id, "not mine".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAuthor));

        let edited = h
            .coordinator
            .edit(h.alice, view.id, "final".into())
            .await
            .unwrap();
        assert_eq!(edited.text, "final");
        h.coordinator.delete(h.alice, view.id).await.unwrap();

        let events = drain(&mut bob_rx);
        let names: Vec<_> = events.iter().map(|e| e.event.name()).collect();
        assert_eq!(
            names,
            [
                "message-edited",
                "conversation-updated",
                "message-deleted",
                "conversation-updated",
            ]
        );
        match (&events[1].event, &events[3].event) {
            (ServerEvent::ConversationUpdated(edited), ServerEvent::ConversationUpdated(deleted)) => {
                assert_eq!(edited.preview.as_deref(), Some("final"));
                assert_eq!(deleted.last_message_id, view.id);
                assert_eq!(deleted.preview, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn older_message_changes_leave_the_inbox_alone() {
        let h = harness().await;
        let older = h
            .coordinator
            .send(h.alice, h.conversation, "older".into(), None)
            .await
            .unwrap();
        h.coordinator
            .send(h.bob, h.conversation, "newer".into(), None)
            .await
            .unwrap();
        let mut bob_rx = listen(&h.router, h.bob);

        h.coordinator
            .edit(h.alice, older.id, "older, fixed".into())
            .await
            .unwrap();
        h.coordinator.delete(h.alice, older.id).await.unwrap();

        let names: Vec<_> = drain(&mut bob_rx).iter().map(|e| e.event.name()).collect();
        assert_eq!(names, ["message-edited", "message-deleted"]);
    }
}

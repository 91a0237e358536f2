use std::sync::Arc;

use huddle_shared::protocol::{ServerEvent, TypingNotice};
use huddle_shared::types::{ConnectionId, ConversationId, IdentityId, Topic};

use crate::error::ChatError;
use crate::router::ChannelRouter;
use crate::store::SharedStore;

/// Typing indicators. Nothing is stored; events go to the conversation
/// topic only, from connections that joined it and whose identity is still
/// a participant.
#[derive(Clone)]
pub struct TypingIndicator {
    store: SharedStore,
    router: Arc<ChannelRouter>,
}

impl TypingIndicator {
    pub fn new(store: SharedStore, router: Arc<ChannelRouter>) -> Self {
        Self { store, router }
    }

    pub async fn set_typing(
        &self,
        connection: ConnectionId,
        identity: IdentityId,
        conversation: ConversationId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let topic = Topic::Conversation(conversation);
        if !self.router.is_subscribed(connection, topic) {
            return Err(ChatError::NotAParticipant);
        }

        let participants = self
            .store
            .call(move |db| db.participant_ids(conversation))
            .await?;
        if !participants.contains(&identity) {
            self.router.leave(connection, topic);
            return Err(ChatError::NotAParticipant);
        }

        let notice = TypingNotice {
            conversation_id: conversation,
            identity_id: identity,
        };
        let event = if is_typing {
            ServerEvent::TypingStart(notice)
        } else {
            ServerEvent::TypingStop(notice)
        };
        self.router.publish_to_topic(conversation, &participants, event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::protocol::ServerFrame;
    use huddle_store::Database;
    use tokio::sync::mpsc;

    struct Harness {
        typing: TypingIndicator,
        router: Arc<ChannelRouter>,
        store: SharedStore,
    }

    fn harness() -> Harness {
        let store = SharedStore::new(Database::open_in_memory().unwrap());
        let router = Arc::new(ChannelRouter::new());
        Harness {
            typing: TypingIndicator::new(store.clone(), router.clone()),
            router,
            store,
        }
    }

    fn join(
        router: &ChannelRouter,
        identity: IdentityId,
        conversation: ConversationId,
    ) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::channel(8);
        router.attach(connection, identity, tx);
        router.join(connection, Topic::Conversation(conversation));
        (connection, rx)
    }

    fn event_names(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<&'static str> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|frame| match ServerFrame::decode(&frame) {
                Ok(ServerFrame::Event(envelope)) => Some(envelope.event.name()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn typing_reaches_topic_but_not_personal_channels() {
        let h = harness();
        let (alice, bob, carol) = (IdentityId::new(), IdentityId::new(), IdentityId::new());
        let conversation = h
            .store
            .call(move |db| db.create_group("Ops", alice, &[bob, carol]))
            .await
            .unwrap()
            .id;

        let (alice_conn, _alice_rx) = join(&h.router, alice, conversation);
        let (_, mut bob_rx) = join(&h.router, bob, conversation);

        // Carol is a participant but never joined the topic.
        let (carol_tx, mut carol_rx) = mpsc::channel(8);
        h.router.attach(ConnectionId::new(), carol, carol_tx);

        h.typing.set_typing(alice_conn, alice, conversation, true).await.unwrap();
        h.typing.set_typing(alice_conn, alice, conversation, false).await.unwrap();

        assert_eq!(event_names(&mut bob_rx), ["typing-start", "typing-stop"]);
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_without_joining_is_rejected() {
        let h = harness();
        let (tx, _rx) = mpsc::channel(8);
        let connection = ConnectionId::new();
        let identity = IdentityId::new();
        h.router.attach(connection, identity, tx);

        let err = h
            .typing
            .set_typing(connection, identity, ConversationId::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));
    }

    #[tokio::test]
    async fn removed_participant_cannot_type() {
        let h = harness();
        let (alice, bob) = (IdentityId::new(), IdentityId::new());
        let conversation = h
            .store
            .call(move |db| db.create_group("Ops", alice, &[bob]))
            .await
            .unwrap()
            .id;
        let (_, mut alice_rx) = join(&h.router, alice, conversation);
        let (bob_conn, _bob_rx) = join(&h.router, bob, conversation);

        h.store
            .call(move |db| db.remove_participant(conversation, alice, bob))
            .await
            .unwrap();

        let err = h
            .typing
            .set_typing(bob_conn, bob, conversation, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));
        assert!(!h.router.is_subscribed(bob_conn, Topic::Conversation(conversation)));
        assert!(event_names(&mut alice_rx).is_empty());
    }
}

//! Topic and personal channel fanout.
//!
//! Each connection owns a bounded outbound queue drained by its writer task.
//! Publishing never waits on a slow connection. What happens when a queue is
//! full depends on the traffic: typing and presence frames are simply
//! dropped, while a connection that cannot take a conversation event is
//! detached, which closes its socket so the client reconnects and refetches
//! history instead of silently missing a message.
//!
//! Conversation topics are re-checked against the current participant list
//! on every publish. Connections whose identity has left the conversation
//! since joining are unsubscribed instead of served.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};
use uuid::Uuid;

use huddle_shared::protocol::{EventEnvelope, ServerEvent, ServerFrame};
use huddle_shared::types::{ConnectionId, ConversationId, IdentityId, Topic};

/// Encoded frames waiting for a connection's writer task.
pub type Outbound = mpsc::Sender<Arc<str>>;

/// What to do with a connection whose queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overflow {
    Drop,
    Disconnect,
}

enum Offer {
    Sent,
    Full,
    Closed,
}

struct Subscriber {
    identity: IdentityId,
    outbound: Outbound,
    topics: HashSet<Topic>,
}

/// Lock order: when both maps are touched at once, `connections` is locked
/// before `topics`. Publishing only ever holds one of them at a time.
#[derive(Default)]
pub struct ChannelRouter {
    connections: DashMap<ConnectionId, Subscriber>,
    topics: DashMap<Topic, HashSet<ConnectionId>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and subscribe it to its identity's personal
    /// channel. The router keeps `outbound` until the connection is
    /// detached.
    pub fn attach(&self, connection: ConnectionId, identity: IdentityId, outbound: Outbound) {
        let personal = Topic::Personal(identity);
        let mut subscriber = self.connections.entry(connection).or_insert(Subscriber {
            identity,
            outbound,
            topics: HashSet::new(),
        });
        subscriber.topics.insert(personal);
        self.topics.entry(personal).or_default().insert(connection);

        debug!(%connection, %identity, "Connection attached");
    }

    /// Drop a connection and all of its subscriptions.
    pub fn detach(&self, connection: ConnectionId) -> bool {
        let Some((_, subscriber)) = self.connections.remove(&connection) else {
            return false;
        };
        for topic in &subscriber.topics {
            self.remove_member(*topic, connection);
        }

        debug!(%connection, identity = %subscriber.identity, "Connection detached");
        true
    }

    /// Subscribe a connection to a topic. Returns `false` if it was already
    /// subscribed or is not attached.
    pub fn join(&self, connection: ConnectionId, topic: Topic) -> bool {
        let Some(mut subscriber) = self.connections.get_mut(&connection) else {
            return false;
        };
        if !subscriber.topics.insert(topic) {
            return false;
        }
        self.topics.entry(topic).or_default().insert(connection);
        true
    }

    /// Unsubscribe a connection from a topic. The personal channel cannot be
    /// left while attached.
    pub fn leave(&self, connection: ConnectionId, topic: Topic) -> bool {
        let Some(mut subscriber) = self.connections.get_mut(&connection) else {
            return false;
        };
        if topic == Topic::Personal(subscriber.identity) || !subscriber.topics.remove(&topic) {
            return false;
        }
        self.remove_member(topic, connection);
        true
    }

    pub fn is_subscribed(&self, connection: ConnectionId, topic: Topic) -> bool {
        self.connections
            .get(&connection)
            .map(|s| s.topics.contains(&topic))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map(|set| set.len()).unwrap_or(0)
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Best-effort publish on a conversation topic, to connections of
    /// current participants only. Used for typing.
    pub fn publish_to_topic(
        &self,
        conversation: ConversationId,
        participants: &[IdentityId],
        event: ServerEvent,
    ) -> usize {
        let topic = Topic::Conversation(conversation);
        let envelope = EventEnvelope::new(Uuid::new_v4(), topic, event);
        self.deliver(topic, envelope, participants, Overflow::Drop)
    }

    /// Publish on a conversation's topic and on the personal channel of
    /// every participant (except `skip_personal`). All copies share one
    /// `eventId`. A connection that cannot keep up is detached.
    pub fn publish_to_conversation(
        &self,
        conversation: ConversationId,
        participants: &[IdentityId],
        event: ServerEvent,
        skip_personal: Option<IdentityId>,
    ) -> usize {
        let event_id = Uuid::new_v4();
        let topic = Topic::Conversation(conversation);
        let mut delivered = self.deliver(
            topic,
            EventEnvelope::new(event_id, topic, event.clone()),
            participants,
            Overflow::Disconnect,
        );

        for identity in participants {
            if Some(*identity) == skip_personal {
                continue;
            }
            let personal = Topic::Personal(*identity);
            delivered += self.deliver(
                personal,
                EventEnvelope::new(event_id, personal, event.clone()),
                participants,
                Overflow::Disconnect,
            );
        }

        debug!(
            %conversation,
            %event_id,
            event = event.name(),
            delivered,
            "Published conversation event"
        );
        delivered
    }

    /// Send a best-effort event to every attached connection.
    pub fn broadcast_all(&self, event: ServerEvent) -> usize {
        let Some(frame) = encode(EventEnvelope::global(Uuid::new_v4(), event)) else {
            return 0;
        };
        self.connections
            .iter()
            .filter(|entry| match offer(&entry.outbound, &frame) {
                Offer::Sent => true,
                Offer::Full => {
                    debug!(connection = %entry.key(), "Dropping frame for slow connection");
                    false
                }
                Offer::Closed => false,
            })
            .count()
    }

    /// Deliver to the connections subscribed to `topic` whose identity is in
    /// `allowed`.
    fn deliver(
        &self,
        topic: Topic,
        envelope: EventEnvelope,
        allowed: &[IdentityId],
        overflow: Overflow,
    ) -> usize {
        // Snapshot the member list so the topic shard is not held while
        // touching connection shards.
        let members: Vec<ConnectionId> = match self.topics.get(&topic) {
            Some(set) => set.iter().copied().collect(),
            None => return 0,
        };
        if members.is_empty() {
            return 0;
        }
        let Some(frame) = encode(envelope) else {
            return 0;
        };

        let mut delivered = 0;
        let mut outsiders = Vec::new();
        let mut lagging = Vec::new();
        for connection in members {
            let Some(subscriber) = self.connections.get(&connection) else {
                continue;
            };
            if !allowed.contains(&subscriber.identity) {
                outsiders.push(connection);
                continue;
            }
            match offer(&subscriber.outbound, &frame) {
                Offer::Sent => delivered += 1,
                Offer::Full => lagging.push(connection),
                Offer::Closed => {}
            }
        }

        // No connection guard is held past this point.
        for connection in outsiders {
            if self.leave(connection, topic) {
                debug!(%connection, %topic, "Unsubscribed former participant");
            }
        }
        for connection in lagging {
            match overflow {
                Overflow::Drop => {
                    debug!(%connection, %topic, "Dropping frame for slow connection");
                }
                Overflow::Disconnect => {
                    warn!(%connection, %topic, "Outbound queue full, disconnecting");
                    self.detach(connection);
                }
            }
        }
        delivered
    }

    fn remove_member(&self, topic: Topic, connection: ConnectionId) {
        if let dashmap::mapref::entry::Entry::Occupied(mut entry) = self.topics.entry(topic) {
            entry.get_mut().remove(&connection);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

fn encode(envelope: EventEnvelope) -> Option<Arc<str>> {
    match ServerFrame::Event(envelope).encode() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!(error = %e, "Failed to encode event");
            None
        }
    }
}

fn offer(outbound: &Outbound, frame: &Arc<str>) -> Offer {
    match outbound.try_send(frame.clone()) {
        Ok(()) => Offer::Sent,
        Err(TrySendError::Full(_)) => Offer::Full,
        Err(TrySendError::Closed(_)) => Offer::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::protocol::{PresenceNotice, TypingNotice};

    fn connect(router: &ChannelRouter, identity: IdentityId) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(8);
        let connection = ConnectionId::new();
        router.attach(connection, identity, tx);
        (connection, rx)
    }

    fn envelopes(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            match ServerFrame::decode(&frame).unwrap() {
                ServerFrame::Event(envelope) => out.push(envelope),
                ServerFrame::Reply(reply) => panic!("unexpected reply {reply:?}"),
            }
        }
        out
    }

    fn typing(conversation: ConversationId, identity: IdentityId) -> ServerEvent {
        ServerEvent::TypingStart(TypingNotice {
            conversation_id: conversation,
            identity_id: identity,
        })
    }

    #[tokio::test]
    async fn attach_subscribes_personal_channel() {
        let router = ChannelRouter::new();
        let alice = IdentityId::new();
        let conversation = ConversationId::new();
        let (connection, mut rx) = connect(&router, alice);

        assert!(router.is_subscribed(connection, Topic::Personal(alice)));
        let delivered =
            router.publish_to_conversation(conversation, &[alice], typing(conversation, alice), None);
        assert_eq!(delivered, 1);
        let received = envelopes(&mut rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].topic, Topic::Personal(alice).to_string());

        // The personal channel cannot be left.
        assert!(!router.leave(connection, Topic::Personal(alice)));
    }

    #[tokio::test]
    async fn topic_delivery_requires_join() {
        let router = ChannelRouter::new();
        let alice = IdentityId::new();
        let conversation = ConversationId::new();
        let topic = Topic::Conversation(conversation);
        let (connection, mut rx) = connect(&router, alice);

        assert_eq!(router.publish_to_topic(conversation, &[alice], typing(conversation, alice)), 0);

        assert!(router.join(connection, topic));
        assert!(!router.join(connection, topic));
        assert_eq!(router.publish_to_topic(conversation, &[alice], typing(conversation, alice)), 1);
        assert_eq!(envelopes(&mut rx).len(), 1);

        assert!(router.leave(connection, topic));
        assert_eq!(router.subscriber_count(topic), 0);
        assert_eq!(router.publish_to_topic(conversation, &[alice], typing(conversation, alice)), 0);
    }

    #[tokio::test]
    async fn conversation_fanout_shares_event_id() {
        let router = ChannelRouter::new();
        let (alice, bob) = (IdentityId::new(), IdentityId::new());
        let conversation = ConversationId::new();
        let (alice_conn, mut alice_rx) = connect(&router, alice);
        let (_, mut bob_rx) = connect(&router, bob);
        router.join(alice_conn, Topic::Conversation(conversation));

        let delivered =
            router.publish_to_conversation(conversation, &[alice, bob], typing(conversation, alice), None);
        assert_eq!(delivered, 3);

        let alice_copies = envelopes(&mut alice_rx);
        let bob_copies = envelopes(&mut bob_rx);
        assert_eq!(alice_copies.len(), 2);
        assert_eq!(bob_copies.len(), 1);
        assert_eq!(alice_copies[0].event_id, alice_copies[1].event_id);
        assert_eq!(alice_copies[0].event_id, bob_copies[0].event_id);
    }

    #[tokio::test]
    async fn skip_personal_excludes_one_identity() {
        let router = ChannelRouter::new();
        let (alice, bob) = (IdentityId::new(), IdentityId::new());
        let conversation = ConversationId::new();
        let (_, mut alice_rx) = connect(&router, alice);
        let (_, mut bob_rx) = connect(&router, bob);

        router.publish_to_conversation(conversation, &[alice, bob], typing(conversation, alice), Some(alice));

        assert!(envelopes(&mut alice_rx).is_empty());
        assert_eq!(envelopes(&mut bob_rx).len(), 1);
    }

    #[tokio::test]
    async fn former_participants_are_unsubscribed_on_publish() {
        let router = ChannelRouter::new();
        let (alice, carol) = (IdentityId::new(), IdentityId::new());
        let conversation = ConversationId::new();
        let topic = Topic::Conversation(conversation);
        let (alice_conn, mut alice_rx) = connect(&router, alice);
        let (carol_conn, mut carol_rx) = connect(&router, carol);
        router.join(alice_conn, topic);
        router.join(carol_conn, topic);

        // Carol joined while a member, then was removed.
        router.publish_to_conversation(conversation, &[alice], typing(conversation, alice), None);

        assert!(envelopes(&mut carol_rx).is_empty());
        assert_eq!(envelopes(&mut alice_rx).len(), 2);
        assert!(!router.is_subscribed(carol_conn, topic));
        assert_eq!(router.subscriber_count(topic), 1);

        router.publish_to_topic(conversation, &[alice], typing(conversation, alice));
        assert!(envelopes(&mut carol_rx).is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_best_effort_frames() {
        let router = ChannelRouter::new();
        let alice = IdentityId::new();
        let conversation = ConversationId::new();
        let (tx, mut rx) = mpsc::channel(1);
        let connection = ConnectionId::new();
        router.attach(connection, alice, tx);
        router.join(connection, Topic::Conversation(conversation));

        assert_eq!(router.publish_to_topic(conversation, &[alice], typing(conversation, alice)), 1);
        assert_eq!(router.publish_to_topic(conversation, &[alice], typing(conversation, alice)), 0);
        assert_eq!(envelopes(&mut rx).len(), 1);
        assert_eq!(router.connection_count(), 1);
    }

    #[tokio::test]
    async fn full_queue_disconnects_on_conversation_events() {
        let router = ChannelRouter::new();
        let (alice, bob) = (IdentityId::new(), IdentityId::new());
        let conversation = ConversationId::new();
        let (tx, mut bob_rx) = mpsc::channel(3);
        let bob_conn = ConnectionId::new();
        router.attach(bob_conn, bob, tx);
        router.join(bob_conn, Topic::Conversation(conversation));

        let participants = [alice, bob];
        assert_eq!(
            router.publish_to_conversation(conversation, &participants, typing(conversation, alice), None),
            2
        );
        // One slot left for two copies: the connection is cut instead of
        // silently missing the event.
        assert_eq!(
            router.publish_to_conversation(conversation, &participants, typing(conversation, alice), None),
            1
        );
        assert_eq!(router.connection_count(), 0);
        assert!(!router.is_subscribed(bob_conn, Topic::Personal(bob)));

        // The router held the only sender, so the writer sees the queue close
        // once it has drained what was already accepted.
        let mut drained = 0;
        while bob_rx.recv().await.is_some() {
            drained += 1;
        }
        assert_eq!(drained, 3);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let router = ChannelRouter::new();
        let (_, mut rx1) = connect(&router, IdentityId::new());
        let (_, mut rx2) = connect(&router, IdentityId::new());

        let who = IdentityId::new();
        let sent = router.broadcast_all(ServerEvent::IdentityOnline(PresenceNotice { identity_id: who }));
        assert_eq!(sent, 2);
        for rx in [&mut rx1, &mut rx2] {
            let got = envelopes(rx);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].topic, "global");
        }
    }

    #[tokio::test]
    async fn detach_removes_all_subscriptions() {
        let router = ChannelRouter::new();
        let alice = IdentityId::new();
        let topic = Topic::Conversation(ConversationId::new());
        let (connection, _rx) = connect(&router, alice);
        router.join(connection, topic);

        assert!(router.detach(connection));
        assert!(!router.detach(connection));
        assert_eq!(router.connection_count(), 0);
        assert_eq!(router.subscriber_count(topic), 0);
        assert_eq!(router.subscriber_count(Topic::Personal(alice)), 0);
        assert!(!router.join(connection, topic));
    }
}

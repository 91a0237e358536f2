//! WebSocket connection gateway.
//!
//! One reader loop and one writer task per connection. The reader handles
//! frames strictly in arrival order; the writer drains the connection's
//! bounded outbound queue into the socket. Replies go through the same
//! queue as events, so a connection sees them in the order they were
//! produced.
//!
//! The router holds the only strong sender for a connection's queue. Once
//! the connection is detached, on disconnect or because it fell too far
//! behind, the writer drains what was already queued, closes the socket,
//! and the reader loop stops.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, WeakSender};
use tracing::{debug, info, warn};

use huddle_shared::protocol::{
    ClientRequest, InboundFrame, MessageView, PresenceNotice, Reply, ServerEvent, ServerFrame,
};
use huddle_shared::types::{ConnectionId, IdentityId, Topic};
use huddle_shared::{ErrorCode, ProtocolError};
use huddle_store::StaffProfile;

use crate::api::AppState;
use crate::auth;
use crate::error::ChatError;
use crate::router::Outbound;

/// How long a closing connection's writer may spend flushing queued frames.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// A live, authenticated connection.
pub struct Session {
    pub connection: ConnectionId,
    pub identity: IdentityId,
}

/// Successful outcome of one request.
enum Outcome {
    Ack,
    Message(MessageView),
    Toggled(bool),
    Online(Vec<IdentityId>),
    /// Fire-and-forget requests get no reply.
    Silent,
}

impl Outcome {
    fn into_reply(self, request_id: Option<String>) -> Option<Reply> {
        match self {
            Outcome::Ack => Some(Reply::ok(request_id)),
            Outcome::Message(view) => Some(Reply::message(request_id, view)),
            Outcome::Toggled(added) => Some(Reply::toggled(request_id, added)),
            Outcome::Online(ids) => Some(Reply::online(request_id, ids)),
            Outcome::Silent => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Attach a new connection to the router and presence registry. Announces
/// the identity globally if this is its first connection.
pub fn connect(state: &AppState, identity: IdentityId, outbound: Outbound) -> Session {
    let connection = ConnectionId::new();
    state.router.attach(connection, identity, outbound);

    let first = state.presence.register(identity, connection, || {
        state
            .router
            .broadcast_all(ServerEvent::IdentityOnline(PresenceNotice { identity_id: identity }));
    });
    if first {
        info!(%identity, "Identity online");
    }

    Session {
        connection,
        identity,
    }
}

/// Tear down a connection. Store work it already submitted keeps running.
pub fn disconnect(state: &AppState, session: &Session) {
    state.router.detach(session.connection);

    let last = state.presence.unregister(session.identity, session.connection, || {
        state.router.broadcast_all(ServerEvent::IdentityOffline(PresenceNotice {
            identity_id: session.identity,
        }));
    });
    if last {
        info!(identity = %session.identity, "Identity offline");
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Handle one inbound text frame and produce the reply, if any.
pub async fn handle_text(state: &AppState, session: &Session, text: &str) -> Option<Reply> {
    let frame = match InboundFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection = %session.connection, error = %e, "Malformed frame");
            return Some(Reply::failed(
                salvage_request_id(text),
                ErrorCode::BadRequest,
                "Malformed frame",
            ));
        }
    };

    let InboundFrame {
        request_id,
        request,
    } = frame;
    let name = request.name();
    debug!(
        connection = %session.connection,
        identity = %session.identity,
        request = name,
        "Handling request"
    );

    match dispatch(state, session, request).await {
        Ok(outcome) => outcome.into_reply(request_id),
        Err(e) => {
            warn!(
                connection = %session.connection,
                identity = %session.identity,
                request = name,
                error = %e,
                "Request rejected"
            );
            Some(Reply::failed(request_id, e.code(), e.client_message()))
        }
    }
}

async fn dispatch(
    state: &AppState,
    session: &Session,
    request: ClientRequest,
) -> Result<Outcome, ChatError> {
    let identity = session.identity;

    match request {
        ClientRequest::JoinTopic(target) => {
            let conversation = target.conversation_id;
            let member = state
                .store
                .call(move |db| db.is_participant(conversation, identity))
                .await?;
            if !member {
                return Err(ChatError::NotAParticipant);
            }
            state
                .router
                .join(session.connection, Topic::Conversation(conversation));
            Ok(Outcome::Ack)
        }
        ClientRequest::LeaveTopic(target) => {
            state.router.leave(
                session.connection,
                Topic::Conversation(target.conversation_id),
            );
            Ok(Outcome::Ack)
        }
        ClientRequest::SendMessage(send) => state
            .messages
            .send(identity, send.conversation_id, send.text, send.reply_to_id)
            .await
            .map(Outcome::Message),
        ClientRequest::EditMessage(edit) => state
            .messages
            .edit(identity, edit.message_id, edit.text)
            .await
            .map(Outcome::Message),
        ClientRequest::DeleteMessage(target) => {
            state.messages.delete(identity, target.message_id).await?;
            Ok(Outcome::Ack)
        }
        ClientRequest::SetTyping(typing) => {
            // Best effort: typing failures are never reported back.
            if let Err(e) = state
                .typing
                .set_typing(
                    session.connection,
                    identity,
                    typing.conversation_id,
                    typing.is_typing,
                )
                .await
            {
                debug!(connection = %session.connection, error = %e, "Typing ignored");
            }
            Ok(Outcome::Silent)
        }
        ClientRequest::MarkRead(target) => {
            state
                .receipts
                .mark_read(identity, target.conversation_id)
                .await?;
            Ok(Outcome::Silent)
        }
        ClientRequest::ToggleReaction(toggle) => state
            .reactions
            .toggle(identity, toggle.message_id, toggle.emoji)
            .await
            .map(Outcome::Toggled),
        ClientRequest::QueryOnline => Ok(Outcome::Online(state.presence.snapshot())),
    }
}

/// Best-effort `requestId` from a frame that failed to decode, so the client
/// can still correlate the error.
fn salvage_request_id(text: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("requestId")?
        .as_str()
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// `GET /ws`. Authenticates before upgrading; a failed handshake gets a 401
/// and never touches presence.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match auth::authenticate(&state, &headers).await {
        Ok(profile) => {
            info!(
                identity = %profile.identity_id,
                staff = %profile.staff_id,
                "WebSocket handshake accepted"
            );
            ws.on_upgrade(move |socket| run_connection(socket, state, profile))
        }
        Err(e) => {
            warn!("WebSocket handshake rejected");
            e.into_response()
        }
    }
}

async fn run_connection(socket: WebSocket, state: AppState, profile: StaffProfile) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.config.outbound_buffer);
    let replies = tx.downgrade();

    let session = connect(&state, profile.identity_id, tx);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });
    let mut writer_done = false;

    loop {
        let incoming = tokio::select! {
            incoming = stream.next() => incoming,
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        };
        let reply = match incoming {
            Some(Ok(Message::Text(text))) => handle_text(&state, &session, &text).await,
            Some(Ok(Message::Binary(_))) => Some(Reply::failed(
                None,
                ErrorCode::BadRequest,
                ProtocolError::Unsupported.to_string(),
            )),
            Some(Ok(Message::Close(_))) | None => break,
            // Ping/pong are answered by the protocol layer.
            Some(Ok(_)) => None,
            Some(Err(e)) => {
                debug!(connection = %session.connection, error = %e, "WebSocket read failed");
                break;
            }
        };

        if let Some(reply) = reply {
            if !send_reply(&replies, reply).await {
                debug!(connection = %session.connection, "Connection detached by router");
                break;
            }
        }
    }

    disconnect(&state, &session);
    if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        debug!(connection = %session.connection, "Writer did not drain in time");
        writer.abort();
    }

    debug!(connection = %session.connection, "Connection closed");
}

/// Queue a reply behind any events already waiting. Returns `false` once the
/// connection's queue is gone.
async fn send_reply(replies: &WeakSender<Arc<str>>, reply: Reply) -> bool {
    let json = match ServerFrame::Reply(reply).encode() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode reply");
            return true;
        }
    };
    match replies.upgrade() {
        Some(tx) => tx.send(Arc::from(json)).await.is_ok(),
        None => false,
    }
}

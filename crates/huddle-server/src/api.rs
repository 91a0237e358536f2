use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_shared::types::{ConversationId, ConversationKind, MessageId};
use huddle_store::Database;

use crate::auth;
use crate::config::ServerConfig;
use crate::coordinator::MessageCoordinator;
use crate::error::ChatError;
use crate::gateway;
use crate::presence::PresenceRegistry;
use crate::reactions::ReactionToggle;
use crate::receipts::ReceiptTracker;
use crate::router::ChannelRouter;
use crate::store::SharedStore;
use crate::typing::TypingIndicator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: SharedStore,
    pub presence: Arc<PresenceRegistry>,
    pub router: Arc<ChannelRouter>,
    pub messages: MessageCoordinator,
    pub reactions: ReactionToggle,
    pub receipts: ReceiptTracker,
    pub typing: TypingIndicator,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let store = SharedStore::new(db);
        let router = Arc::new(ChannelRouter::new());
        Self {
            config: Arc::new(config),
            presence: Arc::new(PresenceRegistry::new()),
            messages: MessageCoordinator::new(store.clone(), router.clone()),
            reactions: ReactionToggle::new(store.clone(), router.clone()),
            receipts: ReceiptTracker::new(store.clone(), router.clone()),
            typing: TypingIndicator::new(store.clone(), router.clone()),
            store,
            router,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(gateway::ws_handler))
        .route("/inbox", get(inbox))
        .route("/unread", get(unread))
        .route("/inbox/:conversation_id/unread", get(conversation_unread))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_identities: usize,
    live_connections: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InboxItem {
    conversation_id: ConversationId,
    kind: ConversationKind,
    title: Option<String>,
    last_message_id: Option<MessageId>,
    last_preview: Option<String>,
    last_activity_at: Option<DateTime<Utc>>,
    unread_count: u64,
    muted_until: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnreadResponse {
    total_unread: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationUnreadResponse {
    conversation_id: ConversationId,
    unread_count: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_identities: state.presence.online_count(),
        live_connections: state.router.connection_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// The caller's non-archived conversations, most recent first.
async fn inbox(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<InboxItem>>, ChatError> {
    let profile = auth::authenticate(&state, &headers).await?;
    let identity = profile.identity_id;

    let entries = state.store.call(move |db| db.inbox_for(identity)).await?;
    let items = entries
        .into_iter()
        .map(|entry| InboxItem {
            conversation_id: entry.conversation.id,
            kind: entry.conversation.kind,
            title: entry.conversation.title,
            last_message_id: entry.conversation.last_message_id,
            last_preview: entry.conversation.last_preview,
            last_activity_at: entry.conversation.last_activity_at,
            unread_count: entry.unread_count,
            muted_until: entry.muted_until,
        })
        .collect();
    Ok(Json(items))
}

async fn unread(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<UnreadResponse>, ChatError> {
    let profile = auth::authenticate(&state, &headers).await?;
    let total_unread = state.receipts.total_unread(profile.identity_id).await?;
    Ok(Json(UnreadResponse { total_unread }))
}

async fn conversation_unread(
    headers: HeaderMap,
    Path(conversation_id): Path<ConversationId>,
    State(state): State<AppState>,
) -> Result<Json<ConversationUnreadResponse>, ChatError> {
    let profile = auth::authenticate(&state, &headers).await?;
    let unread_count = state
        .receipts
        .unread_count(profile.identity_id, conversation_id)
        .await?;
    Ok(Json(ConversationUnreadResponse {
        conversation_id,
        unread_count,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use chrono::Duration;
    use huddle_shared::session::{self, SessionClaims};
    use huddle_shared::types::{IdentityId, StaffId};
    use huddle_store::{NewMessage, StaffProfile};
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(ServerConfig::default(), Database::open_in_memory().unwrap())
    }

    async fn get_json(app: Router, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_and_info() {
        let app = build_router(state());

        let (status, body) = get_json(app.clone(), "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(app, "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Huddle");
        assert_eq!(body["onlineIdentities"], 0);
    }

    #[tokio::test]
    async fn inbox_requires_credential() {
        let app = build_router(state());

        let (status, body) = get_json(app.clone(), "/inbox", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "authentication-failure");

        let (status, _) = get_json(app, "/unread", Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn inbox_lists_unread_counts() {
        let state = state();
        let (alice, bob) = (IdentityId::new(), IdentityId::new());
        state
            .store
            .call(move |db| {
                db.upsert_staff_profile(&StaffProfile {
                    identity_id: bob,
                    staff_id: StaffId::new(),
                    display_name: "Bob".into(),
                })?;
                let conversation = db.find_or_create_direct(alice, bob)?;
                db.send_message(&NewMessage {
                    conversation_id: conversation.id,
                    author_id: alice,
                    text: "quarterly numbers are in",
                    reply_to_id: None,
                })?;
                Ok(())
            })
            .await
            .unwrap();

        let token = session::issue(
            &SessionClaims::new(bob, Duration::minutes(5)),
            &state.config.session_key,
        );
        let app = build_router(state);

        let (status, body) = get_json(app.clone(), "/inbox", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["unreadCount"], 1);
        assert_eq!(body[0]["kind"], "direct");
        assert_eq!(body[0]["lastPreview"], "quarterly numbers are in");

        let (status, body) = get_json(app.clone(), "/unread", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalUnread"], 1);

        let conversation_id = body_conversation(&app, &token).await;
        let uri = format!("/inbox/{conversation_id}/unread");
        let (status, body) = get_json(app.clone(), &uri, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unreadCount"], 1);

        let outsider = format!("/inbox/{}/unread", ConversationId::new());
        let (status, body) = get_json(app, &outsider, Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not-found");
    }

    async fn body_conversation(app: &Router, token: &str) -> String {
        let (_, body) = get_json(app.clone(), "/inbox", Some(token)).await;
        body[0]["conversationId"].as_str().unwrap().to_string()
    }
}

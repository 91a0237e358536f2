//! # huddle-server
//!
//! Realtime conversation gateway for internal staff.
//!
//! This binary provides:
//! - **WebSocket gateway** (`/ws`) with session-credential handshake,
//!   per-connection reader/writer tasks, and typed request dispatch
//! - **Presence registry** that announces only first-connection and
//!   last-connection transitions
//! - **Channel router** fanning events out over conversation topics and
//!   per-identity personal channels
//! - **REST API** (axum) for health, instance info, inbox, and unread totals
//!
//! Conversations, messages, reactions, and read cursors live in SQLite
//! (`huddle-store`).

mod api;
mod auth;
mod config;
mod coordinator;
mod error;
mod gateway;
mod presence;
mod reactions;
mod receipts;
mod router;
mod store;
mod typing;

use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_server=debug")),
        )
        .init();

    info!("Starting Huddle server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.ephemeral_secret {
        tracing::warn!("Session credentials will not survive a restart");
    }

    // -----------------------------------------------------------------------
    // 3. Open the store (runs migrations)
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let http_addr = config.http_addr;
    let app_state = AppState::new(config, db);

    // -----------------------------------------------------------------------
    // 4. Serve until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

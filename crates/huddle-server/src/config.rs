//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use huddle_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_OUTBOUND_BUFFER, DEFAULT_SESSION_COOKIE,
};
use huddle_shared::session::SessionKey;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./huddle.db`
    pub database_path: PathBuf,

    /// MAC key for session credentials, derived from the shared secret.
    /// Env: `SESSION_SECRET` (64 hex chars)
    /// Default: a random secret generated at startup, so credentials issued
    /// elsewhere will not verify.
    pub session_key: SessionKey,

    /// True when `session_key` came from a random startup secret.
    pub ephemeral_secret: bool,

    /// Cookie carrying the session credential.
    /// Env: `SESSION_COOKIE`
    /// Default: `session`
    pub session_cookie: String,

    /// Frames buffered per connection before new ones are dropped.
    /// Env: `OUTBOUND_BUFFER`
    /// Default: `256`
    pub outbound_buffer: usize,

    /// Human-readable name for this instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Huddle"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./huddle.db"),
            session_key: SessionKey::derive(&rand::random::<[u8; 32]>()),
            ephemeral_secret: true,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        match var("SESSION_SECRET") {
            Some(hex_secret) => match parse_secret(&hex_secret) {
                Ok(secret) => {
                    config.session_key = SessionKey::derive(&secret);
                    config.ephemeral_secret = false;
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    "Invalid SESSION_SECRET, using an ephemeral secret"
                ),
            },
            None => tracing::warn!(
                "SESSION_SECRET not set, using an ephemeral secret (dev-only)"
            ),
        }

        if let Some(name) = var("SESSION_COOKIE") {
            if !name.trim().is_empty() {
                config.session_cookie = name.trim().to_string();
            }
        }

        if let Some(val) = var("OUTBOUND_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_BUFFER, using default"),
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte secret.
fn parse_secret(hex_secret: &str) -> Result<[u8; 32], String> {
    let hex_secret = hex_secret.trim();
    if hex_secret.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_secret.len()));
    }
    let bytes = hex::decode(hex_secret).map_err(|e| format!("invalid hex: {e}"))?;
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&bytes);
    Ok(secret)
}

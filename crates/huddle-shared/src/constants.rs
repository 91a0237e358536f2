/// Application name
pub const APP_NAME: &str = "Huddle";

/// Maximum characters kept in a conversation's last-activity preview
pub const PREVIEW_MAX_CHARS: usize = 200;

/// Maximum characters kept in a reply preview
pub const REPLY_PREVIEW_MAX_CHARS: usize = 120;

/// Maximum message body size in bytes (64 KiB)
pub const MAX_MESSAGE_BYTES: usize = 65_536;

/// Maximum emoji length in bytes (covers ZWJ sequences)
pub const MAX_EMOJI_BYTES: usize = 32;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default session cookie name
pub const DEFAULT_SESSION_COOKIE: &str = "session";

/// Default per-connection outbound frame buffer
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Key derivation context for the session MAC key (BLAKE3)
pub const KDF_CONTEXT_SESSION_KEY: &str = "huddle-session-key-v1";

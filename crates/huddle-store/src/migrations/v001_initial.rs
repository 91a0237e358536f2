//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `staff_profiles`, `conversations`,
//! `participants`, and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Staff directory (identity -> staff profile)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS staff_profiles (
    identity_id  TEXT PRIMARY KEY NOT NULL,   -- UUID
    staff_id     TEXT NOT NULL UNIQUE,        -- UUID
    display_name TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    kind             TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
    title            TEXT,
    direct_key       TEXT UNIQUE,                 -- "<low>:<high>" for direct only
    created_at       TEXT NOT NULL,               -- RFC-3339, micros, UTC
    last_activity_at TEXT,
    last_message_id  TEXT,
    last_preview     TEXT
);

CREATE INDEX IF NOT EXISTS idx_conversations_activity
    ON conversations(last_activity_at DESC);

-- ----------------------------------------------------------------
-- Participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    conversation_id TEXT NOT NULL,               -- FK -> conversations(id)
    identity_id     TEXT NOT NULL,
    joined_at       TEXT NOT NULL,
    read_cursor     TEXT,                        -- NULL = never read
    muted_until     TEXT,
    archived        INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1

    PRIMARY KEY (conversation_id, identity_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_identity ON participants(identity_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    conversation_id TEXT NOT NULL,               -- FK -> conversations(id)
    author_id       TEXT NOT NULL,
    body            TEXT NOT NULL,
    reply_to_id     TEXT,                        -- FK -> messages(id)
    created_at      TEXT NOT NULL,               -- assigned by the store
    edited_at       TEXT,
    deleted_at      TEXT,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (reply_to_id) REFERENCES messages(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

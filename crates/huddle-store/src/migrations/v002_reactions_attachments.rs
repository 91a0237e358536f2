use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Reactions: one row per (message, identity, emoji)
CREATE TABLE IF NOT EXISTS reactions (
    message_id  TEXT NOT NULL,              -- FK -> messages(id)
    identity_id TEXT NOT NULL,
    emoji       TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    PRIMARY KEY (message_id, identity_id, emoji),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reactions_message ON reactions(message_id);

-- Attachment metadata (files live in external storage)
CREATE TABLE IF NOT EXISTS attachments (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    message_id TEXT NOT NULL,               -- FK -> messages(id)
    file_name  TEXT NOT NULL,
    url        TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

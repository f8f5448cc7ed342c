//! v001 -- Initial schema creation.
//!
//! Creates the `messages` and `preferences` tables.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,   -- client-generated, unique per conversation
    peer_id    TEXT NOT NULL,               -- peer uniqueId or 'queued'
    content    TEXT NOT NULL,
    is_from_me INTEGER NOT NULL,            -- boolean 0/1
    timestamp  INTEGER NOT NULL,            -- epoch millis
    status     TEXT NOT NULL                -- QUEUED | SENT | DELIVERED | READ
);

CREATE INDEX IF NOT EXISTS idx_messages_peer_ts
    ON messages(peer_id, timestamp ASC);

-- ----------------------------------------------------------------
-- Preferences (flat key-value)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS preferences (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

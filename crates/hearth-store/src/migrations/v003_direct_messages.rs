//! v003 -- Direct-message directory.
//!
//! Three grow-only collections: announced DM users, conversation
//! envelopes, and encrypted direct-message payloads per conversation.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dm_users (
    public_key TEXT PRIMARY KEY NOT NULL,     -- 66 hex chars
    half_key   TEXT NOT NULL                  -- 64 hex chars
);

CREATE TABLE IF NOT EXISTS conversations (
    public_key       TEXT PRIMARY KEY NOT NULL,   -- 64 hex chars
    encrypted_phrase TEXT NOT NULL                -- base64
);

CREATE TABLE IF NOT EXISTS direct_messages (
    conversation TEXT NOT NULL,
    digest       TEXT NOT NULL,               -- BLAKE3 of the payload
    payload      TEXT NOT NULL,               -- base64 ciphertext
    PRIMARY KEY (conversation, digest)
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

//! v001 -- Initial schema creation.
//!
//! Creates the replicated collections (`certificates`, `channels`,
//! `messages`) and the local `meta` key/value table.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Local settings (root CA certificate, ...)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Certificates: every variant is kept, validity is decided on read
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS certificates (
    fingerprint TEXT PRIMARY KEY NOT NULL,    -- BLAKE3 of the encoded certificate
    certificate TEXT NOT NULL,                -- armored certificate string
    username    TEXT NOT NULL,
    public_key  TEXT NOT NULL,                -- hex-encoded Ed25519 pubkey
    not_before  INTEGER NOT NULL,             -- unix seconds
    not_after   INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_certificates_public_key ON certificates(public_key);

-- ----------------------------------------------------------------
-- Channels: first write wins per address
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    address     TEXT PRIMARY KEY NOT NULL,
    name        TEXT NOT NULL,
    description TEXT NOT NULL,
    owner       TEXT NOT NULL,
    timestamp   TEXT NOT NULL                 -- exact JSON number
);

-- ----------------------------------------------------------------
-- Messages: first write wins per id, rowid keeps acceptance order
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,
    channel_address TEXT NOT NULL,
    pub_key         TEXT NOT NULL,
    created_at      REAL NOT NULL,            -- unix seconds
    payload         TEXT NOT NULL,            -- JSON-encoded ChannelMessage
    sending_status  TEXT                      -- NULL for messages from peers
);

CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_address);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

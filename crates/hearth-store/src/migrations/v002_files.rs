//! v002 -- Hosted file metadata.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    cid      TEXT PRIMARY KEY NOT NULL,       -- BLAKE3 content id
    metadata TEXT NOT NULL                    -- JSON-encoded FileMetadata
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

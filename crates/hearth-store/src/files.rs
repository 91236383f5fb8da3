use hearth_shared::FileMetadata;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn insert_file(&self, metadata: &FileMetadata) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO files (cid, metadata) VALUES (?1, ?2)",
            params![metadata.cid.as_str(), serde_json::to_string(metadata)?],
        )?;
        Ok(affected > 0)
    }

    pub fn list_files(&self) -> Result<Vec<FileMetadata>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT metadata FROM files ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut files = Vec::new();
        for row in rows {
            files.push(serde_json::from_str(&row?)?);
        }
        Ok(files)
    }
}

use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::{Conversation, DirectMessage, DmUser};

impl Database {
    pub fn insert_dm_user(&self, user: &DmUser) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO dm_users (public_key, half_key) VALUES (?1, ?2)",
            params![user.public_key, user.half_key],
        )?;
        Ok(affected > 0)
    }

    pub fn list_dm_users(&self) -> Result<Vec<DmUser>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT public_key, half_key FROM dm_users ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(DmUser {
                public_key: row.get(0)?,
                half_key: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO conversations (public_key, encrypted_phrase) VALUES (?1, ?2)",
            params![conversation.public_key, conversation.encrypted_phrase],
        )?;
        Ok(affected > 0)
    }

    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT public_key, encrypted_phrase FROM conversations ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Conversation {
                public_key: row.get(0)?,
                encrypted_phrase: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_direct_message(&self, message: &DirectMessage) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO direct_messages (conversation, digest, payload)
             VALUES (?1, ?2, ?3)",
            params![message.conversation, message.digest(), message.payload],
        )?;
        Ok(affected > 0)
    }

    pub fn list_direct_messages(&self) -> Result<Vec<DirectMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation, payload FROM direct_messages ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DirectMessage {
                conversation: row.get(0)?,
                payload: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

use hearth_shared::{ChannelMessage, SendingStatus};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    pub fn insert_message(
        &self,
        message: &ChannelMessage,
        sending_status: Option<SendingStatus>,
    ) -> Result<bool> {
        let payload = serde_json::to_string(message)?;
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO messages
                (id, channel_address, pub_key, created_at, payload, sending_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.channel_address.as_str(),
                message.pub_key,
                message.created_at.as_f64(),
                payload,
                sending_status.map(status_to_str),
            ],
        )?;
        Ok(affected > 0)
    }

    /// All messages in acceptance order.
    pub fn list_messages(&self) -> Result<Vec<ChannelMessage>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT payload FROM messages ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(serde_json::from_str(&row?)?);
        }
        Ok(messages)
    }

    /// Rewrite the stored payload of an accepted message. Only used to
    /// attach resolved media.
    pub fn update_message_payload(&self, message: &ChannelMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let affected = self.conn().execute(
            "UPDATE messages SET payload = ?1 WHERE id = ?2",
            params![payload, message.id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn set_sending_status(&self, id: &str, status: SendingStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET sending_status = ?1 WHERE id = ?2",
            params![status_to_str(status), id],
        )?;
        Ok(affected > 0)
    }

    pub fn get_sending_status(&self, id: &str) -> Result<Option<SendingStatus>> {
        let status: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT sending_status FROM messages WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.flatten().as_deref().and_then(status_from_str))
    }
}

fn status_to_str(status: SendingStatus) -> &'static str {
    match status {
        SendingStatus::Pending => "pending",
        SendingStatus::Sent => "sent",
    }
}

fn status_from_str(s: &str) -> Option<SendingStatus> {
    match s {
        "pending" => Some(SendingStatus::Pending),
        "sent" => Some(SendingStatus::Sent),
        _ => None,
    }
}

use hearth_shared::types::ChannelAddress;
use hearth_shared::PublicChannel;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Insert a channel unless its address is already taken.
    pub fn insert_channel(&self, channel: &PublicChannel) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO channels (address, name, description, owner, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                channel.address.as_str(),
                channel.name,
                channel.description,
                channel.owner,
                channel.timestamp.canonical(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn list_channels(&self) -> Result<Vec<PublicChannel>> {
        let mut stmt = self.conn().prepare(
            "SELECT address, name, description, owner, timestamp
             FROM channels
             ORDER BY rowid",
        )?;

        let rows = stmt.query_map([], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    pub fn update_channel_description(
        &self,
        address: &ChannelAddress,
        description: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE channels SET description = ?1 WHERE address = ?2",
            params![description, address.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<PublicChannel> {
    let timestamp: String = row.get(4)?;
    let timestamp = serde_json::from_str(&timestamp).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(PublicChannel {
        address: ChannelAddress(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        owner: row.get(3)?,
        timestamp,
    })
}

use rusqlite::params;

use circle_shared::types::{MessageRecord, MessageStatus};

use crate::database::Database;
use crate::error::{Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, peer_id, content, is_from_me, timestamp, status FROM messages";

impl Database {
    /// Insert a message, replacing any row with the same id.
    pub fn upsert_message(&self, record: &MessageRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO messages (id, peer_id, content, is_from_me, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.peer_id,
                record.content,
                record.is_from_me,
                record.timestamp,
                record.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Every message of a conversation, oldest first.
    pub fn get_messages_for_peer(&self, peer_id: &str) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE peer_id = ?1 ORDER BY timestamp ASC"
        ))?;
        let rows = stmt.query_map(params![peer_id], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Messages of a conversation still waiting to be sent, oldest first.
    pub fn get_queued_messages_for_peer(&self, peer_id: &str) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE peer_id = ?1 AND status = ?2 ORDER BY timestamp ASC"
        ))?;
        let rows = stmt.query_map(
            params![peer_id, MessageStatus::Queued.as_str()],
            row_to_record,
        )?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn get_message_by_id(&self, id: &str) -> Result<MessageRecord> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn delete_messages_for_peer(&self, peer_id: &str) -> Result<usize> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE peer_id = ?1", params![peer_id])?;
        Ok(affected)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let status_str: String = row.get(5)?;
    let status = status_str.parse::<MessageStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            Box::new(StoreError::Corrupt(e)),
        )
    })?;

    Ok(MessageRecord {
        id: row.get(0)?,
        peer_id: row.get(1)?,
        content: row.get(2)?,
        is_from_me: row.get(3)?,
        timestamp: row.get(4)?,
        status,
    })
}

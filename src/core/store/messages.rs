use anyhow::Result;
use rusqlite::{Row, params};

use super::types::{AccountId, MessageCategory, TrackedMessageRecord};
use super::{Store, now_ts};

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedMessageRecord> {
    let category: String = row.get(4)?;
    Ok(TrackedMessageRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        message_id: row.get(2)?,
        text: row.get(3)?,
        category: MessageCategory::from_str_opt(&category).unwrap_or(MessageCategory::Reaction),
        delete_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl Store {
    pub async fn track_message(
        &self,
        account_id: AccountId,
        message_id: i64,
        text: Option<&str>,
        category: MessageCategory,
        delete_at: Option<i64>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO tracked_messages
                (account_id, message_id, text, category, delete_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account_id,
                message_id,
                text,
                category.as_str(),
                delete_at,
                now_ts()
            ],
        )?;
        Ok(())
    }

    /// Rows whose expiry is at or before `now`.
    pub async fn expired_messages(&self, now: i64) -> Result<Vec<TrackedMessageRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, account_id, message_id, text, category, delete_at, created_at
             FROM tracked_messages WHERE delete_at IS NOT NULL AND delete_at <= ?1
             ORDER BY delete_at ASC",
        )?;
        let rows = stmt.query_map(params![now], message_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Newest first. `category` narrows the listing when given.
    pub async fn messages_for_account(
        &self,
        account_id: AccountId,
        category: Option<MessageCategory>,
        limit: usize,
    ) -> Result<Vec<TrackedMessageRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, account_id, message_id, text, category, delete_at, created_at
             FROM tracked_messages
             WHERE account_id = ?1 AND (?2 IS NULL OR category = ?2)
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![account_id, category.map(|c| c.as_str()), limit as i64],
            message_from_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn delete_tracked_message(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute("DELETE FROM tracked_messages WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

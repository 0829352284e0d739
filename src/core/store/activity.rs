use anyhow::Result;
use rusqlite::params;

use super::types::{AccountId, ActivityRecord};
use super::{Store, now_ts};

impl Store {
    pub async fn log_activity(
        &self,
        account_id: AccountId,
        action: &str,
        details: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO account_activity (account_id, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![account_id, action, details, now_ts()],
        )?;
        Ok(())
    }

    pub async fn activity_for_account(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT account_id, action, details, created_at FROM account_activity
             WHERE account_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![account_id, limit as i64], |row| {
            Ok(ActivityRecord {
                account_id: row.get(0)?,
                action: row.get(1)?,
                details: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::types::{AccountId, AttemptOutcome, CollectionAttemptRecord};
use super::{Store, now_ts};

impl Store {
    pub async fn record_attempt(
        &self,
        account_id: AccountId,
        outcome: AttemptOutcome,
        rewards_collected: u32,
        email: Option<&str>,
    ) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO collection_attempts (account_id, outcome, rewards_collected, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![account_id, outcome.as_str(), rewards_collected, email, now_ts()],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Timestamp of the latest SUCCESS attempt that actually claimed something.
    pub async fn last_rewarding_attempt_at(&self, account_id: AccountId) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        let ts = db
            .query_row(
                "SELECT MAX(created_at) FROM collection_attempts
                 WHERE account_id = ?1 AND outcome = ?2 AND rewards_collected > 0",
                params![account_id, AttemptOutcome::Success.as_str()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?;
        Ok(ts.flatten())
    }

    pub async fn attempts_for_account(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<CollectionAttemptRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, account_id, outcome, rewards_collected, email, created_at
             FROM collection_attempts WHERE account_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![account_id, limit as i64], |row| {
            let outcome: String = row.get(2)?;
            Ok(CollectionAttemptRecord {
                id: row.get(0)?,
                account_id: row.get(1)?,
                outcome: AttemptOutcome::from_str_opt(&outcome).unwrap_or(AttemptOutcome::Error),
                rewards_collected: row.get(3)?,
                email: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Shifts an account's attempt history into the past.
    #[cfg(test)]
    pub async fn backdate_attempts(&self, account_id: AccountId, secs: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE collection_attempts SET created_at = created_at - ?2 WHERE account_id = ?1",
            params![account_id, secs],
        )?;
        Ok(())
    }
}

use anyhow::Result;
use rusqlite::params;

use super::types::{DailyHistory, SystemStats};
use super::{Store, now_ts};

impl Store {
    pub async fn system_stats(&self) -> Result<SystemStats> {
        let paused = self.is_paused().await?;
        let db = self.db.lock().await;
        let count = |sql: &str| -> rusqlite::Result<i64> { db.query_row(sql, [], |row| row.get(0)) };

        Ok(SystemStats {
            total_accounts: count("SELECT COUNT(*) FROM accounts")?,
            active_accounts: count("SELECT COUNT(*) FROM accounts WHERE status = 'ACTIVE'")?,
            elevated_accounts: count("SELECT COUNT(*) FROM accounts WHERE is_elevated = 1")?,
            blocked_accounts: count("SELECT COUNT(*) FROM accounts WHERE is_blocked = 1")?,
            total_rewards: count(
                "SELECT COALESCE(SUM(rewards_collected), 0) FROM collection_attempts
                 WHERE outcome = 'SUCCESS'",
            )?,
            is_paused: paused,
        })
    }

    /// Per-day success/failure counts over the trailing `days` window.
    pub async fn daily_history(&self, days: i64) -> Result<Vec<DailyHistory>> {
        let db = self.db.lock().await;
        let since = now_ts() - days * 86_400;
        let mut stmt = db.prepare(
            "SELECT DATE(created_at, 'unixepoch') AS day,
                    SUM(CASE WHEN outcome = 'SUCCESS' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN outcome IN ('ERROR', 'SESSION_LOST') THEN 1 ELSE 0 END)
             FROM collection_attempts WHERE created_at > ?1
             GROUP BY day ORDER BY day ASC",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(DailyHistory {
                date: row.get(0)?,
                success: row.get(1)?,
                failed: row.get(2)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

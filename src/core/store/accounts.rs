use anyhow::{Result, bail};
use rusqlite::{OptionalExtension, Row, params};

use super::types::{AccountEmailRecord, AccountId, AccountRecord, AccountStatus};
use super::{Store, now_ts};

const ACCOUNT_COLUMNS: &str = "id, email, status, is_elevated, is_blocked, trial_expires_at, \
     last_check_status, last_check_at, created_at";

fn status_from(raw: String) -> AccountStatus {
    AccountStatus::from_str_opt(&raw).unwrap_or(AccountStatus::NeedAuth)
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        status: status_from(row.get(2)?),
        is_elevated: row.get::<_, i64>(3)? != 0,
        is_blocked: row.get::<_, i64>(4)? != 0,
        trial_expires_at: row.get(5)?,
        last_check_status: row.get(6)?,
        last_check_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Which accounts a scheduler tick may consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleScope {
    ElevatedOnly,
    AllActive,
}

impl Store {
    /// Returns the account, creating a trial account on first contact.
    pub async fn ensure_account(&self, id: AccountId, trial_days: i64) -> Result<AccountRecord> {
        {
            let db = self.db.lock().await;
            let now = now_ts();
            db.execute(
                "INSERT OR IGNORE INTO accounts (id, status, trial_expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    AccountStatus::NeedAuth.as_str(),
                    now + trial_days * 86_400,
                    now
                ],
            )?;
        }
        self.get_account(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account {} vanished after insert", id))
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<AccountRecord>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
        Ok(db.query_row(&sql, params![id], account_from_row).optional()?)
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY created_at DESC, id DESC",
            ACCOUNT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], account_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Active, unblocked accounts the collection scheduler may pick.
    pub async fn schedulable_accounts(&self, scope: ScheduleScope) -> Result<Vec<AccountRecord>> {
        let db = self.db.lock().await;
        let tier_clause = match scope {
            ScheduleScope::ElevatedOnly => " AND is_elevated = 1",
            ScheduleScope::AllActive => "",
        };
        let sql = format!(
            "SELECT {} FROM accounts WHERE status = ?1 AND is_blocked = 0{} ORDER BY id",
            ACCOUNT_COLUMNS, tier_clause
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![AccountStatus::Active.as_str()], account_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Broadcast audience resolution. Unknown group names are rejected.
    pub async fn audience(&self, group: &str) -> Result<Vec<AccountId>> {
        let db = self.db.lock().await;
        let sql = match group {
            "all" => "SELECT id FROM accounts WHERE is_blocked = 0 ORDER BY id",
            "premium" | "elevated" => {
                "SELECT id FROM accounts WHERE is_elevated = 1 AND status = 'ACTIVE' AND is_blocked = 0 ORDER BY id"
            }
            "active" => "SELECT id FROM accounts WHERE status = 'ACTIVE' AND is_blocked = 0 ORDER BY id",
            "blocked" => "SELECT id FROM accounts WHERE is_blocked = 1 ORDER BY id",
            other => bail!("unknown audience group '{}'", other),
        };
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, AccountId>(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE accounts SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Marks the account authenticated and remembers `email` as its primary address.
    pub async fn activate_account(&self, id: AccountId, email: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE accounts SET status = ?1, email = ?2 WHERE id = ?3",
            params![AccountStatus::Active.as_str(), email, id],
        )?;
        Ok(())
    }

    /// Applies tier/block changes. Blocking strips the elevated tier and
    /// elevating lifts a block.
    pub async fn update_account_flags(
        &self,
        id: AccountId,
        blocked: Option<bool>,
        elevated: Option<bool>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let mut changed = 0;
        if let Some(blocked) = blocked {
            changed += if blocked {
                db.execute(
                    "UPDATE accounts SET is_blocked = 1, is_elevated = 0 WHERE id = ?1",
                    params![id],
                )?
            } else {
                db.execute("UPDATE accounts SET is_blocked = 0 WHERE id = ?1", params![id])?
            };
        }
        if let Some(elevated) = elevated {
            changed += if elevated {
                db.execute(
                    "UPDATE accounts SET is_elevated = 1, is_blocked = 0 WHERE id = ?1",
                    params![id],
                )?
            } else {
                db.execute("UPDATE accounts SET is_elevated = 0 WHERE id = ?1", params![id])?
            };
        }
        Ok(changed > 0)
    }

    pub async fn record_session_check(&self, id: AccountId, result: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE accounts SET last_check_status = ?1, last_check_at = ?2 WHERE id = ?3",
            params![result, now_ts(), id],
        )?;
        Ok(())
    }

    // --- Registered emails ---

    pub async fn account_emails(&self, id: AccountId) -> Result<Vec<AccountEmailRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT account_id, email, status, last_collect_at
             FROM account_emails WHERE account_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(AccountEmailRecord {
                account_id: row.get(0)?,
                email: row.get(1)?,
                status: status_from(row.get(2)?),
                last_collect_at: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Registers (or re-activates) an email for the account.
    pub async fn upsert_account_email(&self, id: AccountId, email: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO account_emails (account_id, email, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id, email) DO UPDATE SET status = excluded.status",
            params![id, email, AccountStatus::Active.as_str()],
        )?;
        Ok(())
    }

    pub async fn set_email_status(
        &self,
        id: AccountId,
        email: &str,
        status: AccountStatus,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE account_emails SET status = ?1 WHERE account_id = ?2 AND email = ?3",
            params![status.as_str(), id, email],
        )?;
        Ok(())
    }

    pub async fn touch_email_collected(&self, id: AccountId, email: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE account_emails SET last_collect_at = ?1 WHERE account_id = ?2 AND email = ?3",
            params![now_ts(), id, email],
        )?;
        Ok(())
    }

    pub async fn clear_account_emails(&self, id: AccountId) -> Result<usize> {
        let db = self.db.lock().await;
        Ok(db.execute("DELETE FROM account_emails WHERE account_id = ?1", params![id])?)
    }
}

mod accounts;
mod activity;
mod attempts;
mod commands;
mod flags;
mod messages;
mod stats;
pub mod types;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

pub use accounts::ScheduleScope;
pub use types::*;

pub const FLAG_PAUSED: &str = "is_paused";
pub const FLAG_REWARD_IMG_1: &str = "reward_img_1";
pub const FLAG_REWARD_IMG_2: &str = "reward_img_2";

/// Shared durable store. Both the bot process and the admin process open the
/// same SQLite file; WAL mode plus a busy timeout lets them interleave writes.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Store {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Connection::open(path)?;
        NativePlatform::restrict_file_permissions(path);
        db.busy_timeout(Duration::from_secs(5))?;
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&db)?;
        info!("Store opened at {}", path.display());

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Private in-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        db.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                email TEXT,
                status TEXT NOT NULL DEFAULT 'NEED_AUTH',
                is_elevated INTEGER NOT NULL DEFAULT 0,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                trial_expires_at INTEGER,
                last_check_status TEXT,
                last_check_at INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS account_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'NEED_AUTH',
                last_collect_at INTEGER,
                UNIQUE(account_id, email)
            );

            CREATE TABLE IF NOT EXISTS collection_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                rewards_collected INTEGER NOT NULL DEFAULT 0,
                email TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS command_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '',
                target_id INTEGER,
                target_group TEXT,
                ttl_seconds INTEGER,
                status TEXT NOT NULL DEFAULT 'PENDING',
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS tracked_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                text TEXT,
                category TEXT NOT NULL DEFAULT 'REACTION',
                delete_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE(account_id, message_id)
            );

            CREATE TABLE IF NOT EXISTS system_flags (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS account_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                details TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_account_outcome
                ON collection_attempts(account_id, outcome, created_at);
            CREATE INDEX IF NOT EXISTS idx_command_queue_status_created
                ON command_queue(status, created_at, id);
            CREATE INDEX IF NOT EXISTS idx_tracked_messages_delete_at
                ON tracked_messages(delete_at);",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Accounts ---

    #[tokio::test]
    async fn ensure_account_creates_trial_once() {
        let store = Store::in_memory().unwrap();
        let first = store.ensure_account(42, 3).await.unwrap();
        assert_eq!(first.status, AccountStatus::NeedAuth);
        let expiry = first.trial_expires_at.unwrap();
        assert!(expiry >= first.created_at + 3 * 86_400);

        let again = store.ensure_account(42, 10).await.unwrap();
        assert_eq!(again.trial_expires_at, Some(expiry));
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blocking_strips_elevation_and_elevating_unblocks() {
        let store = Store::in_memory().unwrap();
        store.ensure_account(1, 3).await.unwrap();

        store.update_account_flags(1, None, Some(true)).await.unwrap();
        store.update_account_flags(1, Some(true), None).await.unwrap();
        let account = store.get_account(1).await.unwrap().unwrap();
        assert!(account.is_blocked);
        assert!(!account.is_elevated);

        store.update_account_flags(1, None, Some(true)).await.unwrap();
        let account = store.get_account(1).await.unwrap().unwrap();
        assert!(!account.is_blocked);
        assert!(account.is_elevated);
    }

    #[tokio::test]
    async fn schedulable_accounts_respect_scope() {
        let store = Store::in_memory().unwrap();
        for id in 1..=4 {
            store.ensure_account(id, 3).await.unwrap();
        }
        store.activate_account(1, "a@x.io").await.unwrap();
        store.update_account_flags(1, None, Some(true)).await.unwrap();
        store.activate_account(2, "b@x.io").await.unwrap();
        store.activate_account(3, "c@x.io").await.unwrap();
        store.update_account_flags(3, Some(true), None).await.unwrap();
        store.update_account_flags(4, None, Some(true)).await.unwrap();

        let elevated: Vec<_> = store
            .schedulable_accounts(ScheduleScope::ElevatedOnly)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(elevated, vec![1]);

        let all: Vec<_> = store
            .schedulable_accounts(ScheduleScope::AllActive)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(all, vec![1, 2]);
    }

    #[tokio::test]
    async fn audience_groups_resolve() {
        let store = Store::in_memory().unwrap();
        for id in 1..=3 {
            store.ensure_account(id, 3).await.unwrap();
        }
        store.activate_account(1, "a@x.io").await.unwrap();
        store.update_account_flags(1, None, Some(true)).await.unwrap();
        store.update_account_flags(2, Some(true), None).await.unwrap();

        assert_eq!(store.audience("premium").await.unwrap(), vec![1]);
        assert_eq!(store.audience("blocked").await.unwrap(), vec![2]);
        assert_eq!(store.audience("all").await.unwrap(), vec![1, 3]);
        assert!(store.audience("everyone").await.is_err());
    }

    #[tokio::test]
    async fn account_emails_upsert_and_clear() {
        let store = Store::in_memory().unwrap();
        store.ensure_account(5, 3).await.unwrap();
        store.upsert_account_email(5, "one@x.io").await.unwrap();
        store.upsert_account_email(5, "two@x.io").await.unwrap();
        store
            .set_email_status(5, "one@x.io", AccountStatus::NeedAuth)
            .await
            .unwrap();
        store.upsert_account_email(5, "two@x.io").await.unwrap();

        let emails = store.account_emails(5).await.unwrap();
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].status, AccountStatus::NeedAuth);
        assert_eq!(emails[1].status, AccountStatus::Active);

        assert_eq!(store.clear_account_emails(5).await.unwrap(), 2);
        assert!(store.account_emails(5).await.unwrap().is_empty());
    }

    // --- Collection attempts ---

    #[tokio::test]
    async fn last_rewarding_attempt_ignores_empty_and_lost() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.last_rewarding_attempt_at(9).await.unwrap(), None);

        store
            .record_attempt(9, AttemptOutcome::Empty, 0, None)
            .await
            .unwrap();
        store
            .record_attempt(9, AttemptOutcome::SessionLost, 0, Some("a@x.io"))
            .await
            .unwrap();
        assert_eq!(store.last_rewarding_attempt_at(9).await.unwrap(), None);

        store
            .record_attempt(9, AttemptOutcome::Success, 2, Some("a@x.io"))
            .await
            .unwrap();
        assert!(store.last_rewarding_attempt_at(9).await.unwrap().is_some());
        assert_eq!(store.attempts_for_account(9, 10).await.unwrap().len(), 3);
    }

    // --- Command queue ---

    #[tokio::test]
    async fn claim_is_a_compare_and_swap() {
        let store = Store::in_memory().unwrap();
        let id = store
            .enqueue_command(CommandKind::Broadcast, &NewCommand::default())
            .await
            .unwrap();

        assert!(store.claim_command(id).await.unwrap());
        assert!(!store.claim_command(id).await.unwrap());
        assert!(store.pending_commands().await.unwrap().is_empty());

        assert!(store.fail_command(id, "boom").await.unwrap());
        assert!(!store.complete_command(id).await.unwrap());
        let row = store.get_command(id).await.unwrap().unwrap();
        assert_eq!(row.status, CommandStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn requeued_command_is_pending_again_in_order() {
        let store = Store::in_memory().unwrap();
        let first = store
            .enqueue_command(CommandKind::CheckSession, &NewCommand::default())
            .await
            .unwrap();
        let second = store
            .enqueue_command(CommandKind::TriggerCollect, &NewCommand::default())
            .await
            .unwrap();

        assert!(store.claim_command(first).await.unwrap());
        assert!(store.requeue_command(first).await.unwrap());

        let pending: Vec<_> = store
            .pending_commands()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(pending, vec![first, second]);
    }

    // --- Tracked messages ---

    #[tokio::test]
    async fn expired_messages_only_returns_due_rows() {
        let store = Store::in_memory().unwrap();
        store
            .track_message(1, 10, Some("due"), MessageCategory::Reaction, Some(100))
            .await
            .unwrap();
        store
            .track_message(1, 11, Some("later"), MessageCategory::Reaction, Some(200))
            .await
            .unwrap();
        store
            .track_message(1, 12, None, MessageCategory::Persistent, None)
            .await
            .unwrap();

        let due = store.expired_messages(150).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message_id, 10);

        assert!(store.delete_tracked_message(due[0].id).await.unwrap());
        assert_eq!(store.messages_for_account(1, None, 50).await.unwrap().len(), 2);
        assert_eq!(
            store
                .messages_for_account(1, Some(MessageCategory::Persistent), 50)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    // --- Flags & stats ---

    #[tokio::test]
    async fn pause_flag_round_trip() {
        let store = Store::in_memory().unwrap();
        assert!(!store.is_paused().await.unwrap());
        store.set_paused(true).await.unwrap();
        assert!(store.is_paused().await.unwrap());
        assert_eq!(store.get_flag(FLAG_PAUSED).await.unwrap().as_deref(), Some("1"));
        store.set_paused(false).await.unwrap();
        assert!(!store.is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn reward_images_keep_previous_when_empty() {
        let store = Store::in_memory().unwrap();
        store
            .set_reward_images(&["a.png".to_string(), "b.png".to_string()])
            .await
            .unwrap();
        store.set_reward_images(&[]).await.unwrap();
        assert_eq!(store.reward_images().await.unwrap(), vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn single_reward_image_replaces_both_slots() {
        let store = Store::in_memory().unwrap();
        store
            .set_reward_images(&["a.png".to_string(), "b.png".to_string()])
            .await
            .unwrap();
        store.set_reward_images(&["c.png".to_string()]).await.unwrap();
        assert_eq!(store.reward_images().await.unwrap(), vec!["c.png"]);
    }

    #[tokio::test]
    async fn stats_count_rewards_and_tiers() {
        let store = Store::in_memory().unwrap();
        store.ensure_account(1, 3).await.unwrap();
        store.activate_account(1, "a@x.io").await.unwrap();
        store.update_account_flags(1, None, Some(true)).await.unwrap();
        store
            .record_attempt(1, AttemptOutcome::Success, 2, Some("a@x.io"))
            .await
            .unwrap();
        store
            .record_attempt(1, AttemptOutcome::Error, 0, Some("a@x.io"))
            .await
            .unwrap();
        store.log_activity(1, "collect", Some("2 rewards")).await.unwrap();

        let stats = store.system_stats().await.unwrap();
        assert_eq!(stats.total_accounts, 1);
        assert_eq!(stats.active_accounts, 1);
        assert_eq!(stats.elevated_accounts, 1);
        assert_eq!(stats.total_rewards, 2);

        let history = store.daily_history(7).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].success, 1);
        assert_eq!(history[0].failed, 1);
        assert_eq!(store.activity_for_account(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(&path).await.unwrap();
        store.set_paused(true).await.unwrap();
        drop(store);

        let reopened = Store::open(&path).await.unwrap();
        assert!(reopened.is_paused().await.unwrap());
    }
}

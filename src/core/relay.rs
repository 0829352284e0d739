use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::coordinator::{SlotGuard, TaskCoordinator};
use crate::core::notify::Outbox;
use crate::core::store::{AccountId, CommandKind, MessageCategory, QueuedCommandRecord, Store};
use crate::core::workflow::AccountActions;

pub const DEFAULT_AUDIENCE: &str = "all";

/// NOTIFY payload when the row carries no explicit target.
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    #[serde(rename = "telegramId", alias = "accountId")]
    account_id: AccountId,
    text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Completed,
    /// The target account was busy; the row goes back to PENDING.
    Deferred,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub completed: Vec<i64>,
    pub failed: Vec<i64>,
    pub deferred: Vec<i64>,
    /// Rows another reader claimed first.
    pub lost: Vec<i64>,
}

/// Polls the command queue the admin process writes and executes each row
/// inside the primary process.
///
/// Claiming is a conditional update, so two relays never both run a row.
/// A crash between claim and completion still leaves the row PROCESSING.
pub struct CommandRelay {
    store: Store,
    outbox: Outbox,
    coordinator: Arc<dyn TaskCoordinator>,
    actions: Arc<dyn AccountActions>,
    tick_lock: Mutex<()>,
}

impl CommandRelay {
    pub fn new(
        store: Store,
        outbox: Outbox,
        coordinator: Arc<dyn TaskCoordinator>,
        actions: Arc<dyn AccountActions>,
    ) -> Self {
        Self {
            store,
            outbox,
            coordinator,
            actions,
            tick_lock: Mutex::new(()),
        }
    }

    pub async fn tick(&self) -> Result<RelayReport> {
        let Ok(_running) = self.tick_lock.try_lock() else {
            debug!("Relay tick still running, skipping");
            return Ok(RelayReport::default());
        };

        let mut report = RelayReport::default();
        for command in self.store.pending_commands().await? {
            if !self.store.claim_command(command.id).await? {
                report.lost.push(command.id);
                continue;
            }
            debug!("Relay picked command #{} {}", command.id, command.kind);

            match self.dispatch(&command).await {
                Ok(Dispatch::Completed) => {
                    self.store.complete_command(command.id).await?;
                    report.completed.push(command.id);
                }
                Ok(Dispatch::Deferred) => {
                    self.store.requeue_command(command.id).await?;
                    report.deferred.push(command.id);
                }
                Err(e) => {
                    warn!("Command #{} {} failed: {:#}", command.id, command.kind, e);
                    self.store
                        .fail_command(command.id, &format!("{:#}", e))
                        .await?;
                    report.failed.push(command.id);
                }
            }
        }

        if !report.completed.is_empty() || !report.failed.is_empty() {
            info!(
                "Relay tick: {} completed, {} failed, {} deferred",
                report.completed.len(),
                report.failed.len(),
                report.deferred.len()
            );
        }
        Ok(report)
    }

    async fn dispatch(&self, command: &QueuedCommandRecord) -> Result<Dispatch> {
        let kind = command
            .command_kind()
            .ok_or_else(|| anyhow!("unknown command kind '{}'", command.kind))?;

        match kind {
            CommandKind::Broadcast => self.broadcast(command).await,
            CommandKind::Notify => self.notify(command).await,
            CommandKind::CheckSession => {
                let account_id = self.target_account(command).await?;
                let Some(slot) = SlotGuard::acquire(&self.coordinator, account_id) else {
                    return Ok(Dispatch::Deferred);
                };
                self.actions.check(&slot, false).await?;
                Ok(Dispatch::Completed)
            }
            CommandKind::TriggerCollect => {
                let account_id = self.target_account(command).await?;
                let Some(slot) = SlotGuard::acquire(&self.coordinator, account_id) else {
                    return Ok(Dispatch::Deferred);
                };
                self.actions.collect(&slot).await?;
                Ok(Dispatch::Completed)
            }
            CommandKind::ClearHistory => {
                let account_id = self.target_account(command).await?;
                let removed = self.outbox.purge_history(account_id).await?;
                info!("[{}] Cleared {} tracked messages", account_id, removed);
                self.actions.dashboard(account_id).await?;
                Ok(Dispatch::Completed)
            }
            CommandKind::PauseSystem => {
                self.store.set_paused(true).await?;
                info!("Collection scheduler paused by operator");
                Ok(Dispatch::Completed)
            }
            CommandKind::ResumeSystem => {
                self.store.set_paused(false).await?;
                info!("Collection scheduler resumed by operator");
                Ok(Dispatch::Completed)
            }
        }
    }

    /// Target id from the row, falling back to a numeric payload.
    async fn target_account(&self, command: &QueuedCommandRecord) -> Result<AccountId> {
        let account_id = match command.target_id {
            Some(id) => id,
            None => command
                .payload
                .trim()
                .parse()
                .with_context(|| format!("no target account in payload '{}'", command.payload))?,
        };
        if self.store.get_account(account_id).await?.is_none() {
            bail!("unknown account {}", account_id);
        }
        Ok(account_id)
    }

    fn message_ttl(command: &QueuedCommandRecord) -> Option<Duration> {
        command
            .ttl_seconds
            .filter(|ttl| *ttl > 0)
            .map(|ttl| Duration::from_secs(ttl as u64))
    }

    async fn broadcast(&self, command: &QueuedCommandRecord) -> Result<Dispatch> {
        if command.payload.trim().is_empty() {
            bail!("broadcast without message");
        }
        let audience = match command.target_id {
            Some(id) => vec![id],
            None => {
                let group = command.target_group.as_deref().unwrap_or(DEFAULT_AUDIENCE);
                self.store.audience(group).await?
            }
        };

        let text = format!("📣 Announcement\n\n{}", command.payload);
        let ttl = Self::message_ttl(command);
        let category = if ttl.is_some() {
            MessageCategory::Reaction
        } else {
            MessageCategory::Persistent
        };
        let mut delivered = 0;
        for account_id in &audience {
            match self.outbox.text(*account_id, &text, category, ttl).await {
                Ok(_) => delivered += 1,
                Err(e) => debug!("[{}] Broadcast delivery failed: {}", account_id, e),
            }
        }
        info!("Broadcast #{} delivered to {}/{}", command.id, delivered, audience.len());
        Ok(Dispatch::Completed)
    }

    async fn notify(&self, command: &QueuedCommandRecord) -> Result<Dispatch> {
        let (account_id, text) = match command.target_id {
            Some(id) => (id, command.payload.clone()),
            None => {
                let payload: NotifyPayload = serde_json::from_str(&command.payload)
                    .context("NOTIFY payload must be {telegramId, text}")?;
                (payload.account_id, payload.text)
            }
        };
        if text.trim().is_empty() {
            bail!("notification without text");
        }
        self.outbox
            .text(
                account_id,
                &text,
                MessageCategory::Persistent,
                Self::message_ttl(command),
            )
            .await
            .map_err(|e| {
                error!("[{}] Notification failed: {}", account_id, e);
                e
            })?;
        Ok(Dispatch::Completed)
    }
}

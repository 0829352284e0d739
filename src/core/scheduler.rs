use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::core::coordinator::{SlotGuard, TaskCoordinator};
use crate::core::store::{AccountId, ScheduleScope, Store, now_ts};
use crate::core::workflow::AccountActions;

/// Accounts launched by one tick. The spawned runs keep going after the
/// tick returns; `join` waits for them.
#[derive(Default)]
pub struct ScheduledRun {
    pub launched: Vec<AccountId>,
    pub skipped_busy: Vec<AccountId>,
    tasks: Vec<JoinHandle<()>>,
}

impl ScheduledRun {
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Scheduled collection task panicked: {}", e);
            }
        }
    }
}

/// Routine collection for accounts whose last rewarding run is older than
/// the interval.
pub struct CollectionScheduler {
    store: Store,
    coordinator: Arc<dyn TaskCoordinator>,
    actions: Arc<dyn AccountActions>,
    interval: Duration,
    scope: ScheduleScope,
}

impl CollectionScheduler {
    pub fn new(
        store: Store,
        coordinator: Arc<dyn TaskCoordinator>,
        actions: Arc<dyn AccountActions>,
        interval: Duration,
        scope: ScheduleScope,
    ) -> Self {
        Self {
            store,
            coordinator,
            actions,
            interval,
            scope,
        }
    }

    async fn is_due(&self, account_id: AccountId, now: i64) -> Result<bool> {
        Ok(match self.store.last_rewarding_attempt_at(account_id).await? {
            Some(last) => now - last >= self.interval.as_secs() as i64,
            None => true,
        })
    }

    pub async fn tick(&self) -> Result<ScheduledRun> {
        let mut run = ScheduledRun::default();
        if self.store.is_paused().await? {
            debug!("Scheduler paused, skipping tick");
            return Ok(run);
        }

        let now = now_ts();
        for account in self.store.schedulable_accounts(self.scope).await? {
            match self.is_due(account.id, now).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!("[{}] Could not read collection history: {}", account.id, e);
                    continue;
                }
            }

            let Some(slot) = SlotGuard::acquire(&self.coordinator, account.id) else {
                run.skipped_busy.push(account.id);
                continue;
            };

            info!("[{}] Scheduled collection starting", account.id);
            let actions = self.actions.clone();
            run.launched.push(account.id);
            run.tasks.push(tokio::spawn(async move {
                if let Err(e) = actions.collect(&slot).await {
                    error!("[{}] Scheduled collection failed: {}", slot.account_id(), e);
                }
            }));
        }
        Ok(run)
    }
}

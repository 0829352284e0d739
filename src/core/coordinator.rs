use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::store::AccountId;

/// Cooldown bucket for user-triggered actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Check,
    Collect,
    Login,
}

/// Process-local coordination: single-flight slots per account plus soft
/// per-action cooldowns. Both reset on restart.
pub trait TaskCoordinator: Send + Sync {
    /// Atomic add-if-absent. `false` means another task holds the account.
    fn try_acquire(&self, account_id: AccountId) -> bool;
    fn release(&self, account_id: AccountId);
    fn is_busy(&self, account_id: AccountId) -> bool;
    /// Seconds left in the window, or 0 after recording the invocation.
    fn check_cooldown(&self, account_id: AccountId, kind: ActionKind, window: Duration) -> u64;
}

#[derive(Default)]
pub struct InMemoryCoordinator {
    in_flight: Mutex<HashSet<AccountId>>,
    last_actions: Mutex<HashMap<(AccountId, ActionKind), Instant>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded maps stay consistent even if a holder panicked.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_cooldown_at(
        &self,
        account_id: AccountId,
        kind: ActionKind,
        window: Duration,
        now: Instant,
    ) -> u64 {
        let mut last = lock(&self.last_actions);
        if let Some(previous) = last.get(&(account_id, kind)) {
            let elapsed = now.saturating_duration_since(*previous);
            if elapsed < window {
                let remaining = window - elapsed;
                return remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            }
        }
        last.insert((account_id, kind), now);
        0
    }
}

impl TaskCoordinator for InMemoryCoordinator {
    fn try_acquire(&self, account_id: AccountId) -> bool {
        let acquired = lock(&self.in_flight).insert(account_id);
        debug!("[{}] slot acquire -> {}", account_id, acquired);
        acquired
    }

    fn release(&self, account_id: AccountId) {
        lock(&self.in_flight).remove(&account_id);
        debug!("[{}] slot released", account_id);
    }

    fn is_busy(&self, account_id: AccountId) -> bool {
        lock(&self.in_flight).contains(&account_id)
    }

    fn check_cooldown(&self, account_id: AccountId, kind: ActionKind, window: Duration) -> u64 {
        self.check_cooldown_at(account_id, kind, window, Instant::now())
    }
}

/// Proof of holding an account slot. Dropping it releases the slot exactly
/// once, whichever way the owning task exits.
pub struct SlotGuard {
    coordinator: Arc<dyn TaskCoordinator>,
    account_id: AccountId,
}

impl SlotGuard {
    pub fn acquire(coordinator: &Arc<dyn TaskCoordinator>, account_id: AccountId) -> Option<Self> {
        if coordinator.try_acquire(account_id) {
            Some(Self {
                coordinator: coordinator.clone(),
                account_id,
            })
        } else {
            None
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.coordinator.release(self.account_id);
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("account_id", &self.account_id)
            .finish()
    }
}

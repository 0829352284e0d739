use std::sync::Arc;
use std::time::Duration;

use super::fakes::ScriptedActions;
use crate::core::coordinator::{InMemoryCoordinator, SlotGuard, TaskCoordinator};
use crate::core::scheduler::CollectionScheduler;
use crate::core::store::{AccountStatus, AttemptOutcome, ScheduleScope, Store};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

async fn account(store: &Store, id: i64, elevated: bool) {
    store.ensure_account(id, 3).await.unwrap();
    store.activate_account(id, "racer@mail.com").await.unwrap();
    if elevated {
        store.update_account_flags(id, None, Some(true)).await.unwrap();
    }
}

fn scheduler(
    store: &Store,
    coordinator: &Arc<dyn TaskCoordinator>,
    actions: &Arc<ScriptedActions>,
    scope: ScheduleScope,
) -> CollectionScheduler {
    CollectionScheduler::new(
        store.clone(),
        coordinator.clone(),
        actions.clone(),
        DAY,
        scope,
    )
}

#[tokio::test]
async fn stale_success_triggers_exactly_one_collection() {
    let store = Store::in_memory().unwrap();
    account(&store, 1, false).await;
    store
        .record_attempt(1, AttemptOutcome::Success, 2, Some("racer@mail.com"))
        .await
        .unwrap();
    store.backdate_attempts(1, 25 * 60 * 60).await.unwrap();

    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let actions = Arc::new(ScriptedActions::default());
    let s = scheduler(&store, &coordinator, &actions, ScheduleScope::AllActive);

    let run = s.tick().await.unwrap();
    assert_eq!(run.launched, vec![1]);
    run.join().await;
    assert_eq!(actions.collected(), vec![1]);
    assert!(!coordinator.is_busy(1));
}

#[tokio::test]
async fn recent_success_is_not_due() {
    let store = Store::in_memory().unwrap();
    account(&store, 1, true).await;
    store
        .record_attempt(1, AttemptOutcome::Success, 1, None)
        .await
        .unwrap();
    store.backdate_attempts(1, 23 * 60 * 60).await.unwrap();

    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let actions = Arc::new(ScriptedActions::default());
    let run = scheduler(&store, &coordinator, &actions, ScheduleScope::ElevatedOnly)
        .tick()
        .await
        .unwrap();
    assert!(run.launched.is_empty());
}

#[tokio::test]
async fn empty_and_lost_attempts_do_not_count_as_collected() {
    let store = Store::in_memory().unwrap();
    account(&store, 1, true).await;
    store
        .record_attempt(1, AttemptOutcome::Empty, 0, None)
        .await
        .unwrap();
    store
        .record_attempt(1, AttemptOutcome::SessionLost, 0, None)
        .await
        .unwrap();

    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let actions = Arc::new(ScriptedActions::default());
    let run = scheduler(&store, &coordinator, &actions, ScheduleScope::ElevatedOnly)
        .tick()
        .await
        .unwrap();
    assert_eq!(run.launched, vec![1]);
    run.join().await;
}

#[tokio::test]
async fn paused_system_selects_nobody() {
    let store = Store::in_memory().unwrap();
    account(&store, 1, true).await;
    store.set_paused(true).await.unwrap();

    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let actions = Arc::new(ScriptedActions::default());
    let s = scheduler(&store, &coordinator, &actions, ScheduleScope::AllActive);
    assert!(s.tick().await.unwrap().launched.is_empty());

    store.set_paused(false).await.unwrap();
    let run = s.tick().await.unwrap();
    assert_eq!(run.launched, vec![1]);
    run.join().await;
}

#[tokio::test]
async fn ineligible_accounts_are_skipped() {
    let store = Store::in_memory().unwrap();
    account(&store, 1, true).await;
    account(&store, 2, false).await;
    account(&store, 3, true).await;
    store.update_account_flags(3, Some(true), None).await.unwrap();
    account(&store, 4, true).await;
    store
        .set_account_status(4, AccountStatus::NeedAuth)
        .await
        .unwrap();

    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let actions = Arc::new(ScriptedActions::default());

    let run = scheduler(&store, &coordinator, &actions, ScheduleScope::ElevatedOnly)
        .tick()
        .await
        .unwrap();
    assert_eq!(run.launched, vec![1]);
    run.join().await;

    let run = scheduler(&store, &coordinator, &actions, ScheduleScope::AllActive)
        .tick()
        .await
        .unwrap();
    assert_eq!(run.launched, vec![1, 2]);
    run.join().await;
}

#[tokio::test]
async fn busy_account_is_skipped_silently() {
    let store = Store::in_memory().unwrap();
    account(&store, 1, true).await;
    account(&store, 2, true).await;

    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let actions = Arc::new(ScriptedActions::default());
    let held = SlotGuard::acquire(&coordinator, 1).unwrap();

    let run = scheduler(&store, &coordinator, &actions, ScheduleScope::ElevatedOnly)
        .tick()
        .await
        .unwrap();
    assert_eq!(run.launched, vec![2]);
    assert_eq!(run.skipped_busy, vec![1]);
    run.join().await;
    assert!(coordinator.is_busy(1));
    drop(held);
    assert!(!coordinator.is_busy(1));
}

#[tokio::test]
async fn failed_collection_still_releases_the_slot() {
    let store = Store::in_memory().unwrap();
    account(&store, 1, true).await;

    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let actions = Arc::new(ScriptedActions::failing_for(1));
    let run = scheduler(&store, &coordinator, &actions, ScheduleScope::ElevatedOnly)
        .tick()
        .await
        .unwrap();
    run.join().await;
    assert!(!coordinator.is_busy(1));
}

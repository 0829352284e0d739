use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::store::{AccountId, CommandKind, NewCommand};

use super::super::AppState;
use super::{enqueue, failure};

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

pub async fn get_accounts_endpoint(State(state): State<AppState>) -> Json<Value> {
    match state.store.list_accounts().await {
        Ok(accounts) => Json(json!({ "success": true, "accounts": accounts })),
        Err(e) => failure(e),
    }
}

pub async fn get_activity_endpoint(
    Path(id): Path<AccountId>,
    Query(query): Query<LimitQuery>,
    State(state): State<AppState>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(50);
    match state.store.activity_for_account(id, limit).await {
        Ok(activity) => Json(json!({ "success": true, "activity": activity })),
        Err(e) => failure(e),
    }
}

pub async fn get_messages_endpoint(
    Path(id): Path<AccountId>,
    State(state): State<AppState>,
) -> Json<Value> {
    match state.store.messages_for_account(id, None, 50).await {
        Ok(messages) => Json(json!({ "success": true, "messages": messages })),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    is_blocked: Option<bool>,
    is_elevated: Option<bool>,
}

fn status_notice(req: &UpdateStatusRequest) -> Option<&'static str> {
    match (req.is_blocked, req.is_elevated) {
        (Some(true), _) => Some("⛔ Your access to this bot has been restricted."),
        (_, Some(true)) => Some("⭐ Premium enabled! Your rewards are now collected automatically."),
        (_, Some(false)) => Some("ℹ️ Premium has ended for your account."),
        (Some(false), None) => Some("✅ Your access has been restored."),
        (None, None) => None,
    }
}

pub async fn update_status_endpoint(
    Path(id): Path<AccountId>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Json<Value> {
    match state.store.get_account(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return failure(format!("unknown account {}", id)),
        Err(e) => return failure(e),
    }
    if let Err(e) = state
        .store
        .update_account_flags(id, payload.is_blocked, payload.is_elevated)
        .await
    {
        return failure(e);
    }

    match status_notice(&payload) {
        Some(text) => {
            enqueue(
                &state.store,
                CommandKind::Notify,
                NewCommand {
                    payload: text.to_string(),
                    target_id: Some(id),
                    ..NewCommand::default()
                },
            )
            .await
        }
        None => Json(json!({ "success": true })),
    }
}

fn targeted(id: AccountId) -> NewCommand {
    NewCommand {
        target_id: Some(id),
        ..NewCommand::default()
    }
}

pub async fn check_session_endpoint(
    Path(id): Path<AccountId>,
    State(state): State<AppState>,
) -> Json<Value> {
    enqueue(&state.store, CommandKind::CheckSession, targeted(id)).await
}

pub async fn clear_history_endpoint(
    Path(id): Path<AccountId>,
    State(state): State<AppState>,
) -> Json<Value> {
    enqueue(&state.store, CommandKind::ClearHistory, targeted(id)).await
}

pub async fn trigger_collect_endpoint(
    Path(id): Path<AccountId>,
    State(state): State<AppState>,
) -> Json<Value> {
    enqueue(&state.store, CommandKind::TriggerCollect, targeted(id)).await
}

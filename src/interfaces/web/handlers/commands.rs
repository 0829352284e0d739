use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::store::{CommandKind, NewCommand};

use super::super::AppState;
use super::{enqueue, failure};

#[derive(Deserialize)]
pub struct BroadcastRequest {
    message: String,
    /// `all`, `premium`, `active` or `blocked`; defaults to everyone.
    group: Option<String>,
    ttl_seconds: Option<i64>,
}

pub async fn broadcast_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<BroadcastRequest>,
) -> Json<Value> {
    let message = payload.message.trim();
    if message.is_empty() {
        return failure("message is required");
    }
    enqueue(
        &state.store,
        CommandKind::Broadcast,
        NewCommand {
            payload: message.to_string(),
            target_id: None,
            target_group: payload.group.filter(|g| !g.trim().is_empty()),
            ttl_seconds: payload.ttl_seconds.filter(|ttl| *ttl > 0),
        },
    )
    .await
}

#[derive(Deserialize)]
pub struct CommandsQuery {
    limit: Option<usize>,
}

pub async fn get_commands_endpoint(
    Query(query): Query<CommandsQuery>,
    State(state): State<AppState>,
) -> Json<Value> {
    match state.store.recent_commands(query.limit.unwrap_or(50)).await {
        Ok(commands) => Json(json!({ "success": true, "commands": commands })),
        Err(e) => failure(e),
    }
}

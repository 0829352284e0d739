use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::core::store::{CommandKind, NewCommand};

use super::super::AppState;
use super::failure;

pub async fn get_stats_endpoint(State(state): State<AppState>) -> Json<Value> {
    let stats = match state.store.system_stats().await {
        Ok(stats) => stats,
        Err(e) => return failure(e),
    };
    match state.store.daily_history(7).await {
        Ok(history) => Json(json!({ "success": true, "metrics": stats, "history": history })),
        Err(e) => failure(e),
    }
}

/// Queues the opposite of the current pause flag. The flag itself only
/// flips once the bot process runs the command.
pub async fn toggle_system_endpoint(State(state): State<AppState>) -> Json<Value> {
    let paused = match state.store.is_paused().await {
        Ok(paused) => paused,
        Err(e) => return failure(e),
    };
    let kind = if paused {
        CommandKind::ResumeSystem
    } else {
        CommandKind::PauseSystem
    };
    match state.store.enqueue_command(kind, &NewCommand::default()).await {
        Ok(id) => Json(json!({
            "success": true,
            "command_id": id,
            "command": kind,
            "paused": !paused,
        })),
        Err(e) => failure(e),
    }
}

pub async fn get_rewards_config_endpoint(State(state): State<AppState>) -> Json<Value> {
    match state.store.reward_images().await {
        Ok(images) => Json(json!({ "success": true, "reward_images": images })),
        Err(e) => failure(e),
    }
}

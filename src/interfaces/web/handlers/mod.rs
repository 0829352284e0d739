pub mod accounts;
pub mod commands;
pub mod system;

use axum::Json;
use serde_json::{Value, json};

use crate::core::store::{CommandKind, NewCommand, Store};

pub(super) fn failure(e: impl std::fmt::Display) -> Json<Value> {
    Json(json!({ "success": false, "error": e.to_string() }))
}

/// Writes one queue row; the bot process executes it on its next relay tick.
pub(super) async fn enqueue(store: &Store, kind: CommandKind, command: NewCommand) -> Json<Value> {
    match store.enqueue_command(kind, &command).await {
        Ok(id) => Json(json!({ "success": true, "command_id": id })),
        Err(e) => failure(e),
    }
}

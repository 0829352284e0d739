use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::types::{CommandKind, CommandStatus, NewCommand, QueuedCommandRecord};
use super::{Store, now_ts};

const COMMAND_COLUMNS: &str = "id, kind, payload, target_id, target_group, ttl_seconds, status, \
     error, created_at, updated_at";

fn command_from_row(row: &Row<'_>) -> rusqlite::Result<QueuedCommandRecord> {
    let status: String = row.get(6)?;
    Ok(QueuedCommandRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        payload: row.get(2)?,
        target_id: row.get(3)?,
        target_group: row.get(4)?,
        ttl_seconds: row.get(5)?,
        status: CommandStatus::from_str_opt(&status).unwrap_or(CommandStatus::Failed),
        error: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl Store {
    /// Appends a PENDING row. This is the only write the admin process makes
    /// towards the primary process.
    pub async fn enqueue_command(&self, kind: CommandKind, command: &NewCommand) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO command_queue (kind, payload, target_id, target_group, ttl_seconds, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                kind.as_str(),
                command.payload,
                command.target_id,
                command.target_group,
                command.ttl_seconds,
                CommandStatus::Pending.as_str(),
                now_ts()
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// PENDING rows in creation order.
    pub async fn pending_commands(&self) -> Result<Vec<QueuedCommandRecord>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM command_queue WHERE status = ?1 ORDER BY created_at ASC, id ASC",
            COMMAND_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![CommandStatus::Pending.as_str()], command_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn get_command(&self, id: i64) -> Result<Option<QueuedCommandRecord>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM command_queue WHERE id = ?1", COMMAND_COLUMNS);
        Ok(db.query_row(&sql, params![id], command_from_row).optional()?)
    }

    pub async fn recent_commands(&self, limit: usize) -> Result<Vec<QueuedCommandRecord>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM command_queue ORDER BY created_at DESC, id DESC LIMIT ?1",
            COMMAND_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], command_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Conditional PENDING -> PROCESSING. Returns false when another reader
    /// already took the row.
    pub async fn claim_command(&self, id: i64) -> Result<bool> {
        self.transition_command(id, CommandStatus::Pending, CommandStatus::Processing, None)
            .await
    }

    pub async fn complete_command(&self, id: i64) -> Result<bool> {
        self.transition_command(id, CommandStatus::Processing, CommandStatus::Completed, None)
            .await
    }

    pub async fn fail_command(&self, id: i64, error: &str) -> Result<bool> {
        self.transition_command(
            id,
            CommandStatus::Processing,
            CommandStatus::Failed,
            Some(error),
        )
        .await
    }

    /// Hands a claimed row back to the queue for a later tick.
    pub async fn requeue_command(&self, id: i64) -> Result<bool> {
        self.transition_command(id, CommandStatus::Processing, CommandStatus::Pending, None)
            .await
    }

    async fn transition_command(
        &self,
        id: i64,
        from: CommandStatus,
        to: CommandStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE command_queue SET status = ?1, error = COALESCE(?2, error), updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![to.as_str(), error, now_ts(), id, from.as_str()],
        )?;
        Ok(changed == 1)
    }
}

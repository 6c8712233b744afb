use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{to_millis, DbPool};
use crate::error::EngineError;
use crate::types::{Column, KanbanColumnConfig};

/// Load a user's board layout. A user without one gets an empty board
/// (only the virtual inbox column).
pub fn get_column_config(pool: &DbPool, user_id: &str) -> Result<KanbanColumnConfig, EngineError> {
    let conn = pool.get()?;
    let json: Option<String> = conn
        .query_row(
            "SELECT columns FROM column_configs WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(json) => Ok(KanbanColumnConfig::new(serde_json::from_str(&json)?)),
        None => Ok(KanbanColumnConfig::default()),
    }
}

/// Replace a user's board layout after checking its invariants.
pub fn save_column_config(
    pool: &DbPool,
    user_id: &str,
    config: &KanbanColumnConfig,
) -> Result<(), EngineError> {
    config.validate()?;

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO column_configs (user_id, columns, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET columns = excluded.columns, updated_at = excluded.updated_at",
        params![user_id, serde_json::to_string(&config.columns)?, to_millis(Utc::now())],
    )?;
    Ok(())
}

/// Read-modify-write a single column inside one transaction.
///
/// The edited config is validated before it is stored. Returns the updated
/// column.
pub fn update_column<F>(
    pool: &DbPool,
    user_id: &str,
    column_id: &str,
    edit: F,
) -> Result<Column, EngineError>
where
    F: FnOnce(&mut Column),
{
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let json: String = tx
        .query_row(
            "SELECT columns FROM column_configs WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| EngineError::ColumnNotFound(column_id.to_string()))?;

    let mut config = KanbanColumnConfig::new(serde_json::from_str(&json)?);
    let column = config
        .column_mut(column_id)
        .ok_or_else(|| EngineError::ColumnNotFound(column_id.to_string()))?;
    edit(column);
    let updated = column.clone();

    config.validate()?;

    tx.execute(
        "UPDATE column_configs SET columns = ?1, updated_at = ?2 WHERE user_id = ?3",
        params![serde_json::to_string(&config.columns)?, to_millis(Utc::now()), user_id],
    )?;
    tx.commit()?;

    Ok(updated)
}

/// Flag a column whose mapped label no longer exists remotely.
pub fn flag_label_error(
    pool: &DbPool,
    user_id: &str,
    column_id: &str,
    message: &str,
    detected_at: DateTime<Utc>,
) -> Result<Column, EngineError> {
    update_column(pool, user_id, column_id, |column| {
        column.has_label_error = true;
        column.label_error_message = Some(message.to_string());
        column.label_error_detected_at = Some(detected_at);
    })
}

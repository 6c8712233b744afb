use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeSet, HashMap};

use super::{from_millis, to_millis, DbPool};
use crate::error::EngineError;
use crate::types::{CachedFields, EmailRecord, SyncState, SyncStatus};

const SELECT_COLUMNS: &str = "id, user_id, email_id, kanban_column_id, label_set, position,
    previous_column_id, sync_state, sync_last_attempt, sync_retry_count, sync_error_message,
    subject, sender_name, sender_address, snippet, received_date, created_at, updated_at";

/// SQLite caps bound parameters per statement; stay well below it.
const DELETE_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub inserted: bool,
}

/// Local write for a column move
#[derive(Debug, Clone)]
pub struct MoveWrite {
    pub record_id: i64,
    pub to_column_id: String,
    pub position: f64,
    /// Set only when the column actually changed
    pub previous_column_id: Option<String>,
    /// Put the record in the pending state (a reconciliation event follows)
    pub mark_pending: bool,
}

/// Insert a record on first observation, otherwise refresh its label mirror
/// and display fields.
///
/// Placement (`kanban_column_id`, `position`) and sync status are only set on
/// insert: an existing record keeps them. New records go to the tail of
/// `column_for_new`.
pub fn upsert_email(
    pool: &DbPool,
    user_id: &str,
    email_id: &str,
    fields: &CachedFields,
    column_for_new: &str,
) -> Result<UpsertOutcome, EngineError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let labels = serde_json::to_string(&fields.label_set)?;
    let now = to_millis(Utc::now());

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM emails WHERE user_id = ?1 AND email_id = ?2",
            params![user_id, email_id],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE emails SET
                    label_set = ?1, subject = ?2, sender_name = ?3, sender_address = ?4,
                    snippet = ?5, received_date = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    labels,
                    fields.subject,
                    fields.sender_name,
                    fields.sender_address,
                    fields.snippet,
                    fields.received_date.map(to_millis),
                    now,
                    id,
                ],
            )?;
            UpsertOutcome { id, inserted: false }
        }
        None => {
            let last: Option<f64> = tx.query_row(
                "SELECT MAX(position) FROM emails WHERE user_id = ?1 AND kanban_column_id = ?2",
                params![user_id, column_for_new],
                |row| row.get(0),
            )?;
            let position = fractional_position::tail_position(last);

            tx.execute(
                "INSERT INTO emails (
                    user_id, email_id, kanban_column_id, label_set, position,
                    subject, sender_name, sender_address, snippet, received_date,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    user_id,
                    email_id,
                    column_for_new,
                    labels,
                    position,
                    fields.subject,
                    fields.sender_name,
                    fields.sender_address,
                    fields.snippet,
                    fields.received_date.map(to_millis),
                    now,
                ],
            )?;
            UpsertOutcome {
                id: tx.last_insert_rowid(),
                inserted: true,
            }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

pub fn get_email(
    pool: &DbPool,
    user_id: &str,
    email_id: &str,
) -> Result<Option<EmailRecord>, EngineError> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM emails WHERE user_id = ?1 AND email_id = ?2",
        SELECT_COLUMNS
    );
    let record = conn
        .query_row(&sql, params![user_id, email_id], row_to_record)
        .optional()?;
    Ok(record)
}

pub fn get_email_by_id(pool: &DbPool, id: i64) -> Result<Option<EmailRecord>, EngineError> {
    let conn = pool.get()?;
    let sql = format!("SELECT {} FROM emails WHERE id = ?1", SELECT_COLUMNS);
    let record = conn.query_row(&sql, params![id], row_to_record).optional()?;
    Ok(record)
}

/// Records of a column in board order
pub fn list_column(
    pool: &DbPool,
    user_id: &str,
    column_id: &str,
) -> Result<Vec<EmailRecord>, EngineError> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM emails WHERE user_id = ?1 AND kanban_column_id = ?2
         ORDER BY position ASC, id ASC",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![user_id, column_id], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// (record id, position) of a column in board order
pub fn column_members(
    pool: &DbPool,
    user_id: &str,
    column_id: &str,
) -> Result<Vec<(i64, f64)>, EngineError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, position FROM emails WHERE user_id = ?1 AND kanban_column_id = ?2
         ORDER BY position ASC, id ASC",
    )?;
    let members = stmt
        .query_map(params![user_id, column_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Write a move, respacing the destination column first when `reindexed` is
/// non-empty. Returns the updated record.
pub fn apply_move(
    pool: &DbPool,
    write: &MoveWrite,
    reindexed: &[(i64, f64)],
) -> Result<EmailRecord, EngineError> {
    {
        let mut conn = pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = to_millis(Utc::now());

        for (id, position) in reindexed {
            tx.execute(
                "UPDATE emails SET position = ?1, updated_at = ?2 WHERE id = ?3",
                params![position, now, id],
            )?;
        }

        let updated = tx.execute(
            "UPDATE emails SET
                kanban_column_id = ?1,
                position = ?2,
                previous_column_id = COALESCE(?3, previous_column_id),
                sync_state = CASE WHEN ?4 THEN 'pending' ELSE sync_state END,
                sync_retry_count = CASE WHEN ?4 THEN 0 ELSE sync_retry_count END,
                sync_error_message = CASE WHEN ?4 THEN NULL ELSE sync_error_message END,
                updated_at = ?5
             WHERE id = ?6",
            params![
                write.to_column_id,
                write.position,
                write.previous_column_id,
                write.mark_pending,
                now,
                write.record_id,
            ],
        )?;
        if updated == 0 {
            return Err(EngineError::EmailNotFound(write.record_id.to_string()));
        }

        tx.commit()?;
    }

    get_email_by_id(pool, write.record_id)?
        .ok_or_else(|| EngineError::EmailNotFound(write.record_id.to_string()))
}

/// Remove records by remote id. Returns the number of rows deleted.
pub fn delete_emails(
    pool: &DbPool,
    user_id: &str,
    email_ids: &[String],
) -> Result<usize, EngineError> {
    if email_ids.is_empty() {
        return Ok(0);
    }

    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let mut deleted = 0;

    for chunk in email_ids.chunks(DELETE_CHUNK) {
        let placeholders: Vec<String> = (0..chunk.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "DELETE FROM emails WHERE user_id = ?1 AND email_id IN ({})",
            placeholders.join(",")
        );

        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() + 1);
        params.push(&user_id);
        for id in chunk {
            params.push(id);
        }

        deleted += tx.execute(&sql, params.as_slice())?;
    }

    tx.commit()?;
    Ok(deleted)
}

pub fn set_sync_status(
    pool: &DbPool,
    record_id: i64,
    status: &SyncStatus,
) -> Result<(), EngineError> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE emails SET sync_state = ?1, sync_last_attempt = ?2, sync_retry_count = ?3,
            sync_error_message = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            status.state.as_str(),
            status.last_attempt.map(to_millis),
            status.retry_count,
            status.error_message,
            to_millis(Utc::now()),
            record_id,
        ],
    )?;
    Ok(())
}

pub fn find_by_sync_state(
    pool: &DbPool,
    user_id: &str,
    state: SyncState,
) -> Result<Vec<EmailRecord>, EngineError> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM emails WHERE user_id = ?1 AND sync_state = ?2 ORDER BY id ASC",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![user_id, state.as_str()], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Records in `state` across every user, oldest first
pub fn find_all_by_sync_state(
    pool: &DbPool,
    state: SyncState,
) -> Result<Vec<EmailRecord>, EngineError> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM emails WHERE sync_state = ?1 ORDER BY updated_at ASC, id ASC",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![state.as_str()], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn count_by_sync_state(
    pool: &DbPool,
    user_id: &str,
) -> Result<HashMap<SyncState, u64>, EngineError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT sync_state, COUNT(*) FROM emails WHERE user_id = ?1 GROUP BY sync_state")?;

    let mut counts = HashMap::new();
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (state, count) = row?;
        *counts.entry(SyncState::from_str(&state)).or_insert(0) += count as u64;
    }
    Ok(counts)
}

fn row_to_record(row: &Row) -> Result<EmailRecord, rusqlite::Error> {
    let labels: String = row.get(4)?;
    let label_set: BTreeSet<String> = serde_json::from_str(&labels).unwrap_or_default();

    Ok(EmailRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        email_id: row.get(2)?,
        kanban_column_id: row.get(3)?,
        label_set,
        position: row.get(5)?,
        previous_column_id: row.get(6)?,
        sync_status: SyncStatus {
            state: SyncState::from_str(&row.get::<_, String>(7)?),
            last_attempt: row.get::<_, Option<i64>>(8)?.map(from_millis),
            retry_count: row.get(9)?,
            error_message: row.get(10)?,
        },
        subject: row.get(11)?,
        sender_name: row.get(12)?,
        sender_address: row.get(13)?,
        snippet: row.get(14)?,
        received_date: row.get::<_, Option<i64>>(15)?.map(from_millis),
        created_at: from_millis(row.get(16)?),
        updated_at: from_millis(row.get(17)?),
    })
}

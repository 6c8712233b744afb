use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{from_millis, to_millis, DbPool};
use crate::error::EngineError;
use crate::types::{SyncAnchor, SyncMode};

pub fn get_anchor(pool: &DbPool, user_id: &str) -> Result<Option<SyncAnchor>, EngineError> {
    let conn = pool.get()?;
    let anchor = conn
        .query_row(
            "SELECT user_id, cursor, last_sync_at, mode, error_count
             FROM sync_anchors WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(SyncAnchor {
                    user_id: row.get(0)?,
                    cursor: row.get(1)?,
                    last_sync_at: row.get::<_, Option<i64>>(2)?.map(from_millis),
                    mode: SyncMode::from_str(&row.get::<_, String>(3)?),
                    error_count: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(anchor)
}

/// Insert or overwrite the whole anchor.
pub fn put_anchor(pool: &DbPool, anchor: &SyncAnchor) -> Result<(), EngineError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO sync_anchors (user_id, cursor, last_sync_at, mode, error_count)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            cursor = excluded.cursor,
            last_sync_at = excluded.last_sync_at,
            mode = excluded.mode,
            error_count = excluded.error_count",
        params![
            anchor.user_id,
            anchor.cursor,
            anchor.last_sync_at.map(to_millis),
            anchor.mode.as_str(),
            anchor.error_count,
        ],
    )?;
    Ok(())
}

/// Store a new cursor after a successful pass and reset the error counter.
pub fn set_cursor(
    pool: &DbPool,
    user_id: &str,
    cursor: &str,
    mode: SyncMode,
    synced_at: DateTime<Utc>,
) -> Result<(), EngineError> {
    put_anchor(
        pool,
        &SyncAnchor {
            user_id: user_id.to_string(),
            cursor: cursor.to_string(),
            last_sync_at: Some(synced_at),
            mode,
            error_count: 0,
        },
    )
}

/// Count a failed pass. Returns the new count (0 when there is no anchor).
pub fn record_error(pool: &DbPool, user_id: &str) -> Result<u32, EngineError> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE sync_anchors SET error_count = error_count + 1 WHERE user_id = ?1",
        params![user_id],
    )?;
    let count = conn
        .query_row(
            "SELECT error_count FROM sync_anchors WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

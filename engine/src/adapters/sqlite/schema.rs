use rusqlite::Connection;

use crate::error::EngineError;

pub fn initialize_schema(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch("
        -- One row per (user, remote message)
        CREATE TABLE IF NOT EXISTS emails (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id             TEXT NOT NULL,
            email_id            TEXT NOT NULL,      -- remote message id
            kanban_column_id    TEXT NOT NULL,      -- board placement, authoritative
            label_set           TEXT NOT NULL DEFAULT '[]',  -- JSON array, mirror of remote labels
            position            REAL NOT NULL,
            previous_column_id  TEXT,

            -- Remote reconciliation
            sync_state          TEXT NOT NULL DEFAULT 'synced',  -- 'synced' | 'pending' | 'error'
            sync_last_attempt   INTEGER,            -- unix epoch ms
            sync_retry_count    INTEGER NOT NULL DEFAULT 0,
            sync_error_message  TEXT,

            -- Cached display fields
            subject             TEXT,
            sender_name         TEXT,
            sender_address      TEXT,
            snippet             TEXT,
            received_date       INTEGER,            -- unix epoch ms

            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,

            UNIQUE(user_id, email_id)
        );

        CREATE INDEX IF NOT EXISTS idx_emails_column     ON emails(user_id, kanban_column_id, position);
        CREATE INDEX IF NOT EXISTS idx_emails_sync_state ON emails(user_id, sync_state);

        -- Board layout, one JSON document per user
        CREATE TABLE IF NOT EXISTS column_configs (
            user_id     TEXT PRIMARY KEY,
            columns     TEXT NOT NULL,              -- JSON array of columns
            updated_at  INTEGER NOT NULL
        );

        -- Change journal cursor per user
        CREATE TABLE IF NOT EXISTS sync_anchors (
            user_id       TEXT PRIMARY KEY,
            cursor        TEXT NOT NULL,
            last_sync_at  INTEGER,
            mode          TEXT NOT NULL DEFAULT 'history',  -- 'history' | 'full'
            error_count   INTEGER NOT NULL DEFAULT 0
        );
    ")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        // Idempotent
        initialize_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"emails".to_string()));
        assert!(tables.contains(&"column_configs".to_string()));
        assert!(tables.contains(&"sync_anchors".to_string()));
    }
}

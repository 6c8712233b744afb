pub mod anchor;
pub mod column;
pub mod email;
pub mod events;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use anchor::{SyncAnchor, SyncMode};
pub use column::{Column, ColumnRef, KanbanColumnConfig, MappingType};
pub use email::{CachedFields, EmailRecord, SyncState, SyncStatus, INBOX_COLUMN_ID};
pub use events::{MoveEvent, MoveKind};

/// Observability snapshot for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total: u64,
    pub synced: u64,
    pub pending: u64,
    pub error: u64,
    /// Columns currently flagged with `has_label_error`
    pub columns_with_label_errors: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub mode: Option<SyncMode>,
    pub anchor_error_count: u32,
}

/// Outcome of a column move, returned before remote reconciliation runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveResult {
    pub record: EmailRecord,
    /// Whether a reconciliation event was queued
    pub reconciliation_queued: bool,
    /// Whether the destination column had to be respaced
    pub reindexed: bool,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What produced a reconciliation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveKind {
    /// User moved a card between columns
    Move,
    /// Card went back to its previous column
    Restore,
    /// Re-emitted for a record stuck in the error state
    Retry,
}

/// Everything the reconciliation listener needs to bring remote labels in
/// line with a column move, without reading the column config again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveEvent {
    pub event_id: Uuid,
    pub kind: MoveKind,
    pub user_id: String,
    pub email_id: String,
    pub from_column_id: String,
    pub to_column_id: String,
    pub labels_to_add: Vec<String>,
    pub labels_to_remove: Vec<String>,
    pub record_id: i64,
    pub timestamp: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the stored cursor was last established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Advanced by reading the change journal
    History,
    /// Issued as a fresh baseline by a full resync
    Full,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Full => "full",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "full" => Self::Full,
            _ => Self::History,
        }
    }
}

/// Per-user position in the provider's change journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAnchor {
    pub user_id: String,
    /// Opaque provider token
    pub cursor: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub mode: SyncMode,
    /// Consecutive failed passes
    pub error_count: u32,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::adapters::provider::RemoteMessage;

/// Id of the virtual column holding messages that no configured column claims.
/// It never has an entry in the user's column config.
pub const INBOX_COLUMN_ID: &str = "inbox";

/// Remote reconciliation state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    Synced,
    Pending,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "error" => Self::Error,
            _ => Self::Synced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_attempt: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl SyncStatus {
    pub fn synced() -> Self {
        Self {
            state: SyncState::Synced,
            last_attempt: None,
            retry_count: 0,
            error_message: None,
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::synced()
    }
}

/// Local record of one remote message, unique on (user_id, email_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: i64,
    pub user_id: String,
    /// Remote message id
    pub email_id: String,
    /// Board placement. Authoritative over `label_set`.
    pub kanban_column_id: String,
    /// Mirror of the remote labels, converges through reconciliation
    pub label_set: BTreeSet<String>,
    pub position: f64,
    pub previous_column_id: Option<String>,
    pub sync_status: SyncStatus,
    pub subject: Option<String>,
    pub sender_name: Option<String>,
    pub sender_address: Option<String>,
    pub snippet: Option<String>,
    pub received_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields refreshed from the provider on every upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedFields {
    pub label_set: BTreeSet<String>,
    pub subject: Option<String>,
    pub sender_name: Option<String>,
    pub sender_address: Option<String>,
    pub snippet: Option<String>,
    pub received_date: Option<DateTime<Utc>>,
}

impl CachedFields {
    pub fn from_remote(message: &RemoteMessage) -> Self {
        let (sender_name, sender_address) = match message.from.as_deref() {
            Some(from) => {
                let (name, address) = parse_sender(from);
                (name, Some(address))
            }
            None => (None, None),
        };

        Self {
            label_set: message.label_ids.iter().cloned().collect(),
            subject: message.subject.clone(),
            sender_name,
            sender_address,
            snippet: message.snippet.clone(),
            received_date: message.received_at,
        }
    }
}

/// Split a `From` header into display name and address.
fn parse_sender(from: &str) -> (Option<String>, String) {
    if let Ok(list) = mailparse::addrparse(from) {
        if let Some(mailparse::MailAddr::Single(info)) = list.iter().next() {
            let name = info
                .display_name
                .as_ref()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            return (name, info.addr.clone());
        }
    }
    (None, from.trim().to_string())
}

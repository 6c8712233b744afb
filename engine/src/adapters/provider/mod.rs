//! Mailbox provider client seam
//!
//! The engine never talks to the remote API directly. Everything goes through
//! [`MailboxProvider`], implemented by whatever client owns authentication and
//! transport. Errors carry an HTTP-like status and the provider's message,
//! and are classified by `crate::classify`.

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ProviderError;

/// A message as returned by the provider (metadata, or full when fetched so)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    pub label_ids: Vec<String>,
    pub subject: Option<String>,
    /// Raw `From` header
    pub from: Option<String>,
    pub snippet: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

/// One page of message ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// One entry of the provider's change journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    MessageAdded(String),
    MessageDeleted(String),
    LabelsAdded { message_id: String, labels: Vec<String> },
    LabelsRemoved { message_id: String, labels: Vec<String> },
}

impl Change {
    pub fn message_id(&self) -> &str {
        match self {
            Self::MessageAdded(id) | Self::MessageDeleted(id) => id,
            Self::LabelsAdded { message_id, .. } | Self::LabelsRemoved { message_id, .. } => {
                message_id
            }
        }
    }
}

/// One page of the change journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalPage {
    pub changes: Vec<Change>,
    pub next_page_token: Option<String>,
    /// Cursor to resume from once every page has been processed
    pub new_cursor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelModification {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelModification {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLabel {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

/// Remote mailbox operations the engine consumes
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// List message ids carrying a label (or matching a query), newest first.
    async fn list_messages(
        &self,
        user_id: &str,
        label_or_query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, ProviderError>;

    async fn get_message(&self, user_id: &str, id: &str) -> Result<RemoteMessage, ProviderError>;

    /// Headers and snippet only
    async fn get_message_metadata(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<RemoteMessage, ProviderError>;

    async fn modify_labels(
        &self,
        user_id: &str,
        id: &str,
        modification: &LabelModification,
    ) -> Result<(), ProviderError>;

    async fn list_labels(&self, user_id: &str) -> Result<Vec<RemoteLabel>, ProviderError>;

    async fn create_label(
        &self,
        user_id: &str,
        name: &str,
        color: Option<&str>,
    ) -> Result<RemoteLabel, ProviderError>;

    /// Read one page of changes recorded after `cursor`.
    async fn get_change_journal(
        &self,
        user_id: &str,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<JournalPage, ProviderError>;

    /// Current head of the change journal, usable as a fresh baseline.
    async fn get_profile_cursor(&self, user_id: &str) -> Result<String, ProviderError>;
}

pub type SharedProvider = Arc<dyn MailboxProvider>;

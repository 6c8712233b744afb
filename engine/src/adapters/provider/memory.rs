//! In-memory provider used by the tests.
//!
//! Cursors are sequence numbers into a local journal. Failures can be
//! scripted per operation, and label modifications are recorded with the
//! (tokio) instant they were made at.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

use super::{
    Change, JournalPage, LabelModification, MailboxProvider, MessagePage, RemoteLabel,
    RemoteMessage,
};
use crate::error::ProviderError;

const JOURNAL_PAGE_SIZE: usize = 2;

#[derive(Default)]
struct State {
    /// Arrival order, oldest first
    messages: Vec<RemoteMessage>,
    journal: Vec<(u64, Change)>,
    seq: u64,
    expired_before: u64,
    labels: Vec<RemoteLabel>,
    modify_script: VecDeque<Result<(), ProviderError>>,
    journal_script: VecDeque<ProviderError>,
    fetch_failures: HashMap<String, ProviderError>,
    modify_calls: Vec<(String, LabelModification, Instant)>,
    journal_cursors: Vec<String>,
    metadata_fetches: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryProvider {
    state: Mutex<State>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add a message and record it in the journal.
    pub fn deliver(&self, id: &str, labels: &[&str]) {
        self.insert_message(id, labels);
        self.push_change(Change::MessageAdded(id.to_string()));
    }

    /// Add a message without journaling it (it predates the cursor).
    pub fn insert_message(&self, id: &str, labels: &[&str]) {
        let mut state = self.lock();
        state.messages.retain(|m| m.id != id);
        state.messages.push(RemoteMessage {
            id: id.to_string(),
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
            subject: Some(format!("Subject {}", id)),
            from: Some(format!("Sender {} <{}@example.com>", id, id)),
            snippet: Some(format!("snippet of {}", id)),
            received_at: None,
        });
    }

    pub fn set_subject(&self, id: &str, subject: &str) {
        let mut state = self.lock();
        if let Some(m) = state.messages.iter_mut().find(|m| m.id == id) {
            m.subject = Some(subject.to_string());
        }
    }

    /// Remove a message remotely and record the deletion.
    pub fn delete(&self, id: &str) {
        self.remove_silently(id);
        self.push_change(Change::MessageDeleted(id.to_string()));
    }

    /// Remove a message without journaling it.
    pub fn remove_silently(&self, id: &str) {
        self.lock().messages.retain(|m| m.id != id);
    }

    pub fn push_change(&self, change: Change) {
        let mut state = self.lock();
        state.seq += 1;
        let seq = state.seq;
        state.journal.push((seq, change));
    }

    /// Reject every cursor issued so far.
    pub fn expire_history(&self) {
        let mut state = self.lock();
        state.seq += 1;
        state.expired_before = state.seq;
    }

    pub fn head(&self) -> String {
        self.lock().seq.to_string()
    }

    pub fn add_label(&self, id: &str, name: &str) {
        self.lock().labels.push(RemoteLabel {
            id: id.to_string(),
            name: name.to_string(),
            color: None,
        });
    }

    pub fn script_modify(&self, result: Result<(), ProviderError>) {
        self.lock().modify_script.push_back(result);
    }

    pub fn script_journal_error(&self, err: ProviderError) {
        self.lock().journal_script.push_back(err);
    }

    pub fn fail_fetch(&self, id: &str, err: ProviderError) {
        self.lock().fetch_failures.insert(id.to_string(), err);
    }

    pub fn modify_calls(&self) -> Vec<(String, LabelModification, Instant)> {
        self.lock().modify_calls.clone()
    }

    pub fn journal_cursors(&self) -> Vec<String> {
        self.lock().journal_cursors.clone()
    }

    pub fn metadata_fetches(&self) -> Vec<String> {
        self.lock().metadata_fetches.clone()
    }

    pub fn labels_of(&self, id: &str) -> Option<Vec<String>> {
        self.lock()
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.label_ids.clone())
    }

    fn find(&self, id: &str) -> Result<RemoteMessage, ProviderError> {
        let state = self.lock();
        if let Some(err) = state.fetch_failures.get(id) {
            return Err(err.clone());
        }
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::new(404, "Requested entity was not found."))
    }
}

#[async_trait]
impl MailboxProvider for InMemoryProvider {
    async fn list_messages(
        &self,
        _user_id: &str,
        label_or_query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, ProviderError> {
        let state = self.lock();
        let matching: Vec<String> = state
            .messages
            .iter()
            .rev()
            .filter(|m| m.label_ids.iter().any(|l| l == label_or_query))
            .map(|m| m.id.clone())
            .collect();

        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + page_size as usize).min(matching.len());
        let ids = matching.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    async fn get_message(&self, _user_id: &str, id: &str) -> Result<RemoteMessage, ProviderError> {
        self.find(id)
    }

    async fn get_message_metadata(
        &self,
        _user_id: &str,
        id: &str,
    ) -> Result<RemoteMessage, ProviderError> {
        self.lock().metadata_fetches.push(id.to_string());
        self.find(id)
    }

    async fn modify_labels(
        &self,
        _user_id: &str,
        id: &str,
        modification: &LabelModification,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state
            .modify_calls
            .push((id.to_string(), modification.clone(), Instant::now()));

        if let Some(scripted) = state.modify_script.pop_front() {
            scripted?;
        }

        if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
            message.label_ids.retain(|l| !modification.remove.contains(l));
            for label in &modification.add {
                if !message.label_ids.contains(label) {
                    message.label_ids.push(label.clone());
                }
            }
        }
        Ok(())
    }

    async fn list_labels(&self, _user_id: &str) -> Result<Vec<RemoteLabel>, ProviderError> {
        Ok(self.lock().labels.clone())
    }

    async fn create_label(
        &self,
        _user_id: &str,
        name: &str,
        color: Option<&str>,
    ) -> Result<RemoteLabel, ProviderError> {
        let mut state = self.lock();
        let label = RemoteLabel {
            id: format!("Label_{}", state.labels.len() + 1),
            name: name.to_string(),
            color: color.map(|c| c.to_string()),
        };
        state.labels.push(label.clone());
        Ok(label)
    }

    async fn get_change_journal(
        &self,
        _user_id: &str,
        cursor: &str,
        page_token: Option<&str>,
    ) -> Result<JournalPage, ProviderError> {
        let mut state = self.lock();
        state.journal_cursors.push(cursor.to_string());

        if let Some(err) = state.journal_script.pop_front() {
            return Err(err);
        }

        let from: u64 = cursor
            .parse()
            .map_err(|_| ProviderError::new(400, "Invalid history ID"))?;
        if from < state.expired_before {
            return Err(ProviderError::new(404, "Requested entity was not found."));
        }

        let pending: Vec<Change> = state
            .journal
            .iter()
            .filter(|(seq, _)| *seq > from)
            .map(|(_, change)| change.clone())
            .collect();

        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + JOURNAL_PAGE_SIZE).min(pending.len());
        let changes = pending.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        let next_page_token = (end < pending.len()).then(|| end.to_string());

        Ok(JournalPage {
            changes,
            next_page_token,
            new_cursor: state.seq.to_string(),
        })
    }

    async fn get_profile_cursor(&self, _user_id: &str) -> Result<String, ProviderError> {
        Ok(self.lock().seq.to_string())
    }
}

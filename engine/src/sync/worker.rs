//! Bounded fetch-and-upsert pool
//!
//! Every pass (incremental, recovery, seed) hands its message ids to
//! [`fetch_and_upsert`]. At most `worker_concurrency` fetches are in flight at
//! once and results come back in completion order. One message failing never
//! stops the others.

use futures::{stream, StreamExt};
use tracing::{debug, warn};

use super::SyncContext;
use crate::adapters::sqlite::{columns, emails};
use crate::classify::{self, ErrorClass, Operation};
use crate::error::EngineError;
use crate::types::{CachedFields, KanbanColumnConfig};

/// Result of processing one message id
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Upserted { inserted: bool },
    /// The message no longer exists remotely
    Gone,
    Failed(String),
}

/// Aggregate of one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Ids to delete locally
    pub gone: Vec<String>,
    /// (message id, reason)
    pub failed: Vec<(String, String)>,
}

impl BatchOutcome {
    fn record(&mut self, id: String, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Upserted { inserted: true } => self.inserted += 1,
            FetchOutcome::Upserted { inserted: false } => self.updated += 1,
            FetchOutcome::Gone => self.gone.push(id),
            FetchOutcome::Failed(reason) => self.failed.push((id, reason)),
        }
    }
}

/// Fetch each message from the provider and upsert it locally.
///
/// The column config is read once per batch; it only decides where new
/// records land.
pub async fn fetch_and_upsert(
    ctx: &SyncContext,
    user_id: &str,
    ids: Vec<String>,
) -> Result<BatchOutcome, EngineError> {
    if ids.is_empty() {
        return Ok(BatchOutcome::default());
    }

    let board = columns::get_column_config(&ctx.pool, user_id)?;
    let concurrency = ctx.config.worker_concurrency.max(1);
    debug!(
        "Fetching {} messages for user {} ({} workers)",
        ids.len(),
        user_id,
        concurrency
    );

    let outcome = stream::iter(ids)
        .map(|id| {
            let board = &board;
            async move {
                let outcome = process_one(ctx, user_id, &id, board).await;
                (id, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .fold(BatchOutcome::default(), |mut batch, (id, outcome)| async move {
            batch.record(id, outcome);
            batch
        })
        .await;

    if !outcome.failed.is_empty() {
        warn!(
            "{} of the fetched messages failed for user {}",
            outcome.failed.len(),
            user_id
        );
    }

    Ok(outcome)
}

async fn process_one(
    ctx: &SyncContext,
    user_id: &str,
    id: &str,
    board: &KanbanColumnConfig,
) -> FetchOutcome {
    let fetched = if ctx.config.fetch_full_messages {
        ctx.provider.get_message(user_id, id).await
    } else {
        ctx.provider.get_message_metadata(user_id, id).await
    };

    let message = match fetched {
        Ok(message) => message,
        Err(err) => {
            return match classify::classify(Operation::MessageFetch, &err) {
                ErrorClass::Invalidated => {
                    debug!("Message {} vanished before fetch for user {}", id, user_id);
                    FetchOutcome::Gone
                }
                class => {
                    warn!("Failed to fetch message {} ({:?}): {}", id, class, err);
                    FetchOutcome::Failed(err.to_string())
                }
            };
        }
    };

    let fields = CachedFields::from_remote(&message);
    let column = board.column_for_labels(&fields.label_set);

    match emails::upsert_email(&ctx.pool, user_id, id, &fields, &column) {
        Ok(outcome) => FetchOutcome::Upserted {
            inserted: outcome.inserted,
        },
        Err(e) => {
            warn!("Failed to store message {} for user {}: {}", id, user_id, e);
            FetchOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::provider::memory::InMemoryProvider;
    use crate::adapters::sqlite::create_memory_pool;
    use crate::config::EngineConfig;
    use crate::error::ProviderError;
    use crate::adapters::provider::{
        JournalPage, LabelModification, MailboxProvider, MessagePage, RemoteLabel, RemoteMessage,
    };
    use crate::types::Column;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> (SyncContext, Arc<InMemoryProvider>) {
        let provider = Arc::new(InMemoryProvider::new());
        let ctx = SyncContext::new(
            create_memory_pool().unwrap(),
            provider.clone(),
            Arc::new(EngineConfig::default()),
        );
        (ctx, provider)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let (ctx, provider) = context();
        provider.insert_message("a", &["INBOX"]);
        provider.insert_message("b", &["INBOX"]);
        provider.insert_message("c", &["INBOX"]);
        provider.fail_fetch("b", ProviderError::new(503, "Service Unavailable"));

        let outcome = fetch_and_upsert(&ctx, "u1", ids(&["a", "b", "c", "ghost"]))
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.gone, vec!["ghost".to_string()]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "b");
        assert!(emails::get_email(&ctx.pool, "u1", "c").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_new_records_land_in_mapped_column() {
        let (ctx, provider) = context();
        columns::save_column_config(
            &ctx.pool,
            "u1",
            &KanbanColumnConfig::new(vec![Column::new("todo", "To Do", 0).with_label("Label_1")]),
        )
        .unwrap();
        provider.insert_message("a", &["INBOX", "Label_1"]);
        provider.insert_message("b", &["INBOX"]);

        fetch_and_upsert(&ctx, "u1", ids(&["a", "b"])).await.unwrap();

        let a = emails::get_email(&ctx.pool, "u1", "a").unwrap().unwrap();
        let b = emails::get_email(&ctx.pool, "u1", "b").unwrap().unwrap();
        assert_eq!(a.kanban_column_id, "todo");
        assert_eq!(b.kanban_column_id, "inbox");
        assert_eq!(a.sender_address.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_metadata_fetch_by_default() {
        let (ctx, provider) = context();
        provider.insert_message("a", &["INBOX"]);

        fetch_and_upsert(&ctx, "u1", ids(&["a"])).await.unwrap();
        assert_eq!(provider.metadata_fetches(), ids(&["a"]));
    }

    /// Delegates to the in-memory fake, holding each metadata fetch open for
    /// a while and recording how many overlap.
    struct SlowProvider {
        inner: InMemoryProvider,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MailboxProvider for SlowProvider {
        async fn list_messages(
            &self,
            user_id: &str,
            label_or_query: &str,
            page_size: u32,
            page_token: Option<&str>,
        ) -> Result<MessagePage, ProviderError> {
            self.inner
                .list_messages(user_id, label_or_query, page_size, page_token)
                .await
        }

        async fn get_message(&self, user_id: &str, id: &str) -> Result<RemoteMessage, ProviderError> {
            self.inner.get_message(user_id, id).await
        }

        async fn get_message_metadata(
            &self,
            user_id: &str,
            id: &str,
        ) -> Result<RemoteMessage, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.get_message_metadata(user_id, id).await
        }

        async fn modify_labels(
            &self,
            user_id: &str,
            id: &str,
            modification: &LabelModification,
        ) -> Result<(), ProviderError> {
            self.inner.modify_labels(user_id, id, modification).await
        }

        async fn list_labels(&self, user_id: &str) -> Result<Vec<RemoteLabel>, ProviderError> {
            self.inner.list_labels(user_id).await
        }

        async fn create_label(
            &self,
            user_id: &str,
            name: &str,
            color: Option<&str>,
        ) -> Result<RemoteLabel, ProviderError> {
            self.inner.create_label(user_id, name, color).await
        }

        async fn get_change_journal(
            &self,
            user_id: &str,
            cursor: &str,
            page_token: Option<&str>,
        ) -> Result<JournalPage, ProviderError> {
            self.inner.get_change_journal(user_id, cursor, page_token).await
        }

        async fn get_profile_cursor(&self, user_id: &str) -> Result<String, ProviderError> {
            self.inner.get_profile_cursor(user_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_never_exceed_worker_concurrency() {
        let provider = Arc::new(SlowProvider {
            inner: InMemoryProvider::new(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let batch: Vec<String> = (0..17).map(|i| format!("m{}", i)).collect();
        for id in &batch {
            provider.inner.insert_message(id, &["INBOX"]);
        }
        let config = EngineConfig::default();
        assert_eq!(config.worker_concurrency, 5);
        let ctx = SyncContext::new(create_memory_pool().unwrap(), provider.clone(), Arc::new(config));

        let outcome = fetch_and_upsert(&ctx, "u1", batch).await.unwrap();

        assert_eq!(outcome.inserted, 17);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 5);
        assert_eq!(provider.in_flight.load(Ordering::SeqCst), 0);
    }
}

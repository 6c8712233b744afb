//! Kanban move reconciler
//!
//! Column moves are written locally and returned right away. When the move
//! changes which labels the message should carry, a [`MoveEvent`] is queued
//! for the reconciliation listener; the caller never waits on it.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::labels::compute_label_delta;
use super::listener::ReconcileQueue;
use crate::adapters::provider::SharedProvider;
use crate::adapters::sqlite::emails::{self, MoveWrite};
use crate::adapters::sqlite::{columns, DbPool};
use crate::classify::{self, ErrorClass, Operation};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::{
    CachedFields, ColumnRef, EmailRecord, KanbanColumnConfig, MoveEvent, MoveKind, MoveResult,
    SyncState, SyncStatus,
};

#[derive(Clone)]
pub struct MoveReconciler {
    pool: DbPool,
    provider: SharedProvider,
    config: Arc<EngineConfig>,
    queue: ReconcileQueue,
}

impl MoveReconciler {
    pub fn new(
        pool: DbPool,
        provider: SharedProvider,
        config: Arc<EngineConfig>,
        queue: ReconcileQueue,
    ) -> Self {
        Self {
            pool,
            provider,
            config,
            queue,
        }
    }

    /// Move a card to `to_column_id` at `destination_index` (end of the
    /// column when `None`).
    ///
    /// A message with no local record yet is fetched and created in
    /// `from_column_id` first.
    pub async fn move_email(
        &self,
        user_id: &str,
        email_id: &str,
        from_column_id: &str,
        to_column_id: &str,
        destination_index: Option<usize>,
    ) -> Result<MoveResult, EngineError> {
        let board = columns::get_column_config(&self.pool, user_id)?;
        let from = board.resolve(from_column_id)?;
        let to = board.resolve(to_column_id)?;

        let record = match emails::get_email(&self.pool, user_id, email_id)? {
            Some(record) => record,
            None => self.move_in(user_id, email_id, &from.id).await?,
        };
        if record.kanban_column_id != from.id {
            debug!(
                "Email {} is in {} but the move says {}",
                email_id, record.kanban_column_id, from.id
            );
        }

        self.relocate(&record, &from, &to, destination_index, MoveKind::Move)
    }

    /// Send a card back to the column it was in before its last move.
    pub fn restore_email(&self, user_id: &str, email_id: &str) -> Result<MoveResult, EngineError> {
        let record = emails::get_email(&self.pool, user_id, email_id)?
            .ok_or_else(|| EngineError::EmailNotFound(email_id.to_string()))?;
        let previous = record
            .previous_column_id
            .clone()
            .ok_or_else(|| EngineError::NothingToRestore(email_id.to_string()))?;

        let board = columns::get_column_config(&self.pool, user_id)?;
        let from = resolve_or_detached(&board, &record.kanban_column_id);
        let to = board.resolve(&previous)?;

        info!(
            "Restoring email {} of user {} from {} to {}",
            email_id, user_id, from.id, to.id
        );
        self.relocate(&record, &from, &to, None, MoveKind::Restore)
    }

    /// Re-emit reconciliation for every record of `user_id` in the error
    /// state. Returns how many events were queued.
    pub fn retry_failed_syncs(&self, user_id: &str) -> Result<usize, EngineError> {
        let failed = emails::find_by_sync_state(&self.pool, user_id, SyncState::Error)?;
        if failed.is_empty() {
            return Ok(0);
        }

        let board = columns::get_column_config(&self.pool, user_id)?;
        let queued = self.requeue(&board, &failed)?;
        info!(
            "Re-queued {} of {} failed syncs for user {}",
            queued,
            failed.len(),
            user_id
        );
        Ok(queued)
    }

    /// Re-emit reconciliation for records left pending by an earlier run.
    pub fn resume_pending(&self) -> Result<usize, EngineError> {
        let pending = emails::find_all_by_sync_state(&self.pool, SyncState::Pending)?;
        let mut by_user: HashMap<String, Vec<EmailRecord>> = HashMap::new();
        for record in pending {
            by_user.entry(record.user_id.clone()).or_default().push(record);
        }

        let mut queued = 0;
        for (user_id, records) in by_user {
            let board = columns::get_column_config(&self.pool, &user_id)?;
            queued += self.requeue(&board, &records)?;
        }
        if queued > 0 {
            info!("Resumed {} pending reconciliations", queued);
        }
        Ok(queued)
    }

    /// Rebuild events for records from their current and previous column,
    /// using the current column config.
    fn requeue(
        &self,
        board: &KanbanColumnConfig,
        records: &[EmailRecord],
    ) -> Result<usize, EngineError> {
        let mut queued = 0;

        for record in records {
            let to = match board.resolve(&record.kanban_column_id) {
                Ok(to) => to,
                Err(e) => {
                    warn!("Skipping email {}: {}", record.email_id, e);
                    continue;
                }
            };
            let from = record
                .previous_column_id
                .as_deref()
                .map(|id| resolve_or_detached(board, id))
                .unwrap_or_else(ColumnRef::inbox);

            let delta = compute_label_delta(&from, &to, &self.config.inbox_label);
            if delta.is_empty() {
                debug!("Nothing left to reconcile for email {}", record.email_id);
                emails::set_sync_status(&self.pool, record.id, &SyncStatus::synced())?;
                continue;
            }

            emails::set_sync_status(
                &self.pool,
                record.id,
                &SyncStatus {
                    state: SyncState::Pending,
                    last_attempt: record.sync_status.last_attempt,
                    retry_count: 0,
                    error_message: None,
                },
            )?;

            let event = MoveEvent {
                event_id: Uuid::new_v4(),
                kind: MoveKind::Retry,
                user_id: record.user_id.clone(),
                email_id: record.email_id.clone(),
                from_column_id: from.id,
                to_column_id: to.id,
                labels_to_add: delta.add,
                labels_to_remove: delta.remove,
                record_id: record.id,
                timestamp: Utc::now(),
            };
            self.queue.enqueue(event)?;
            queued += 1;
        }

        Ok(queued)
    }

    /// Create the local record for a message moved onto the board before
    /// sync saw it.
    async fn move_in(
        &self,
        user_id: &str,
        email_id: &str,
        column_id: &str,
    ) -> Result<EmailRecord, EngineError> {
        let message = match self.provider.get_message_metadata(user_id, email_id).await {
            Ok(message) => message,
            Err(err) if classify::classify(Operation::MessageFetch, &err) == ErrorClass::Invalidated => {
                return Err(EngineError::EmailNotFound(email_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let outcome =
            emails::upsert_email(&self.pool, user_id, email_id, &CachedFields::from_remote(&message), column_id)?;
        info!("Created record for email {} of user {} in {}", email_id, user_id, column_id);

        emails::get_email_by_id(&self.pool, outcome.id)?
            .ok_or_else(|| EngineError::EmailNotFound(email_id.to_string()))
    }

    /// Local write plus event emission, shared by every kind of move.
    ///
    /// The record is marked pending only when an event is queued. A
    /// same-column move or one with an empty label delta keeps its sync
    /// status, since nothing would ever settle a pending state there.
    fn relocate(
        &self,
        record: &EmailRecord,
        from: &ColumnRef,
        to: &ColumnRef,
        destination_index: Option<usize>,
        kind: MoveKind,
    ) -> Result<MoveResult, EngineError> {
        let delta = compute_label_delta(from, to, &self.config.inbox_label);

        let siblings: Vec<(i64, f64)> = emails::column_members(&self.pool, &record.user_id, &to.id)?
            .into_iter()
            .filter(|(id, _)| *id != record.id)
            .collect();
        let positions: Vec<f64> = siblings.iter().map(|(_, position)| *position).collect();
        let index = destination_index.unwrap_or(positions.len());
        let allocation = fractional_position::allocate(&positions, index);

        let reindexed: Vec<(i64, f64)> = match &allocation.reindexed {
            Some(respaced) => siblings
                .iter()
                .map(|(id, _)| *id)
                .zip(respaced.iter().copied())
                .collect(),
            None => Vec::new(),
        };
        if allocation.is_reindexed() {
            info!(
                "Respaced {} cards in column {} of user {}",
                reindexed.len(),
                to.id,
                record.user_id
            );
        }

        let column_changed = from.id != to.id;
        let emit = column_changed && !delta.is_empty();

        let updated = emails::apply_move(
            &self.pool,
            &MoveWrite {
                record_id: record.id,
                to_column_id: to.id.clone(),
                position: allocation.position,
                previous_column_id: column_changed.then(|| from.id.clone()),
                mark_pending: emit,
            },
            &reindexed,
        )?;

        let mut reconciliation_queued = false;
        if emit {
            let event = MoveEvent {
                event_id: Uuid::new_v4(),
                kind,
                user_id: record.user_id.clone(),
                email_id: record.email_id.clone(),
                from_column_id: from.id.clone(),
                to_column_id: to.id.clone(),
                labels_to_add: delta.add,
                labels_to_remove: delta.remove,
                record_id: record.id,
                timestamp: Utc::now(),
            };
            match self.queue.enqueue(event) {
                Ok(()) => reconciliation_queued = true,
                // Local write stands; the record stays pending until resumed
                Err(e) => error!(
                    "Could not queue reconciliation for email {}: {}",
                    record.email_id, e
                ),
            }
        }

        debug!(
            "Moved email {} of user {}: {} -> {} at {} ({:?})",
            record.email_id, record.user_id, from.id, to.id, allocation.position, kind
        );

        Ok(MoveResult {
            record: updated,
            reconciliation_queued,
            reindexed: allocation.is_reindexed(),
        })
    }
}

/// Resolve a column id, treating a column that was removed from the config as
/// an unmapped one.
fn resolve_or_detached(board: &KanbanColumnConfig, id: &str) -> ColumnRef {
    board.resolve(id).unwrap_or_else(|_| ColumnRef {
        id: id.to_string(),
        mapped_label: None,
        auto_archive: false,
        remove_source_label_on_enter: false,
    })
}

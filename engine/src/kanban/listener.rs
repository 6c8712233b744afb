//! Reconciliation listener
//!
//! Move events go through a bounded channel to one listener task. The listener
//! never works on an event itself: each event gets its own task that runs the
//! retry chain, so a backoff only delays that event. Enqueueing never blocks
//! the caller and never drops the event; when the channel is full the send is
//! handed to a task that waits for room.

use chrono::Utc;
use flume::{Receiver, Sender, TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::retry::{ReconcileState, RetryPolicy};
use crate::adapters::provider::{LabelModification, SharedProvider};
use crate::adapters::sqlite::{columns, emails, DbPool};
use crate::error::EngineError;
use crate::types::{MoveEvent, SyncState, SyncStatus, INBOX_COLUMN_ID};

/// Sending side of the reconciliation queue
#[derive(Clone)]
pub struct ReconcileQueue {
    tx: Sender<MoveEvent>,
}

impl ReconcileQueue {
    #[cfg(test)]
    pub(crate) fn from_sender(tx: Sender<MoveEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event without waiting.
    pub fn enqueue(&self, event: MoveEvent) -> Result<(), EngineError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                debug!(
                    "Reconciliation queue full, deferring event {} for email {}",
                    event.event_id, event.email_id
                );
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let event_id = event.event_id;
                    if tx.send_async(event).await.is_err() {
                        warn!("Reconciliation queue closed before event {} was queued", event_id);
                    }
                });
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(EngineError::QueueClosed),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tx.len()
    }
}

/// Shared by every event task
#[derive(Clone)]
pub struct ListenerContext {
    pub pool: DbPool,
    pub provider: SharedProvider,
    pub policy: RetryPolicy,
}

/// Handle to the running listener task
pub struct ListenerHandle {
    stop_tx: Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop accepting events and abandon retry chains still in progress.
    /// Their records stay pending.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.try_send(());
        let _ = self.task.await;
    }
}

/// Start the listener. Returns the queue to send events to.
pub fn spawn(ctx: ListenerContext, capacity: usize) -> (ReconcileQueue, ListenerHandle) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    let (stop_tx, stop_rx) = flume::bounded(1);

    let task = tokio::spawn(run_listener(ctx, rx, stop_rx));

    (ReconcileQueue { tx }, ListenerHandle { stop_tx, task })
}

async fn run_listener(ctx: ListenerContext, rx: Receiver<MoveEvent>, stop_rx: Receiver<()>) {
    info!("Reconciliation listener started");
    let mut chains = JoinSet::new();
    let mut received = 0u64;

    loop {
        tokio::select! {
            event = rx.recv_async() => match event {
                Ok(event) => {
                    received += 1;
                    let ctx = ctx.clone();
                    chains.spawn(async move { reconcile(&ctx, event).await });
                }
                Err(_) => break,
            },
            _ = stop_rx.recv_async() => break,
            // Reap finished chains so the set does not grow
            Some(_) = chains.join_next(), if !chains.is_empty() => {}
        }
    }

    // Close the channel so later enqueues report it
    drop(rx);
    let abandoned = chains.len();
    chains.shutdown().await;
    info!(
        "Reconciliation listener stopped after {} events ({} chains abandoned)",
        received, abandoned
    );
}

/// Run one event's retry chain and store the outcome.
pub async fn reconcile(ctx: &ListenerContext, event: MoveEvent) -> ReconcileState {
    let modification = LabelModification {
        add: event.labels_to_add.clone(),
        remove: event.labels_to_remove.clone(),
    };

    let mut state = ReconcileState::Pending;
    while !state.is_terminal() {
        if let Some(delay) = state.delay(&ctx.policy) {
            debug!(
                "Retrying labels for email {} in {:?} (retry {})",
                event.email_id,
                delay,
                state.retries_made() + 1
            );
            tokio::time::sleep(delay).await;
        }

        if !owns_record(ctx, &event) {
            debug!("Dropping stale event {} for email {}", event.event_id, event.email_id);
            return state;
        }

        let outcome = ctx
            .provider
            .modify_labels(&event.user_id, &event.email_id, &modification)
            .await;
        if let Err(e) = &outcome {
            warn!(
                "Label update failed for email {} of user {}: {}",
                event.email_id, event.user_id, e
            );
        }
        state = state.next(&ctx.policy, outcome.as_ref().map(|_| ()));
    }

    if let Err(e) = store_outcome(ctx, &event, &state) {
        error!(
            "Failed to store reconciliation result for email {}: {}",
            event.email_id, e
        );
    }
    state
}

/// Whether the record still exists and still sits where this event put it.
/// A later move owns the sync status from then on.
fn owns_record(ctx: &ListenerContext, event: &MoveEvent) -> bool {
    match emails::get_email_by_id(&ctx.pool, event.record_id) {
        Ok(Some(record)) => record.kanban_column_id == event.to_column_id,
        Ok(None) => false,
        Err(e) => {
            warn!("Could not load record {}: {}", event.record_id, e);
            true
        }
    }
}

fn store_outcome(
    ctx: &ListenerContext,
    event: &MoveEvent,
    state: &ReconcileState,
) -> Result<(), EngineError> {
    let now = Utc::now();

    match state {
        ReconcileState::Synced => {
            info!("Labels synced for email {} of user {}", event.email_id, event.user_id);
            emails::set_sync_status(
                &ctx.pool,
                event.record_id,
                &SyncStatus {
                    state: SyncState::Synced,
                    last_attempt: Some(now),
                    retry_count: 0,
                    error_message: None,
                },
            )
        }
        ReconcileState::Error {
            retry_count,
            message,
            label_missing,
        } => {
            error!(
                "Giving up on labels for email {} of user {} after {} retries: {}",
                event.email_id, event.user_id, retry_count, message
            );
            emails::set_sync_status(
                &ctx.pool,
                event.record_id,
                &SyncStatus {
                    state: SyncState::Error,
                    last_attempt: Some(now),
                    retry_count: *retry_count,
                    error_message: Some(message.clone()),
                },
            )?;

            if *label_missing && event.to_column_id != INBOX_COLUMN_ID {
                warn!(
                    "Flagging column {} of user {}: mapped label is missing",
                    event.to_column_id, event.user_id
                );
                columns::flag_label_error(&ctx.pool, &event.user_id, &event.to_column_id, message, now)?;
            }
            Ok(())
        }
        ReconcileState::Pending | ReconcileState::Retrying { .. } => Ok(()),
    }
}

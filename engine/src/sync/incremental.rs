//! Incremental change processing
//!
//! Reads the provider's change journal from the stored cursor until it is
//! exhausted, folds the entries into one set of ids to refresh and one set to
//! delete, applies both, then moves the cursor. An invalidated cursor hands
//! control to [`super::recovery`] instead of failing the pass.

use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use super::{recovery, worker, PassKind, SyncContext, SyncReport};
use crate::adapters::provider::Change;
use crate::adapters::sqlite::emails;
use crate::error::EngineError;

/// Deduplicated changes of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Messages to fetch and upsert (additions and label changes)
    pub refresh: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    /// Fold journal entries. A message both added and deleted is deleted.
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a Change>) -> Self {
        let mut set = ChangeSet::default();
        for change in changes {
            match change {
                Change::MessageDeleted(id) => {
                    set.deleted.insert(id.clone());
                }
                other => {
                    set.refresh.insert(other.message_id().to_string());
                }
            }
        }
        set.refresh.retain(|id| !set.deleted.contains(id));
        set
    }

    pub fn is_empty(&self) -> bool {
        self.refresh.is_empty() && self.deleted.is_empty()
    }
}

/// Process the change journal for `user_id` starting at `cursor`.
pub async fn run(ctx: &SyncContext, user_id: &str, cursor: &str) -> Result<SyncReport, EngineError> {
    let anchors = ctx.anchors();
    let mut changes = Vec::new();
    let mut page_token: Option<String> = None;
    let new_cursor;

    loop {
        let page = match ctx
            .provider
            .get_change_journal(user_id, cursor, page_token.as_deref())
            .await
        {
            Ok(page) => page,
            Err(err) if anchors.is_invalid(&err) => {
                warn!(
                    "Cursor {} rejected for user {} ({}), starting recovery",
                    cursor, user_id, err
                );
                return Ok(recovery::recover(ctx, user_id, Some(cursor)).await);
            }
            Err(err) => {
                error!("Failed to read change journal for user {}: {}", user_id, err);
                anchors.record_error(user_id)?;
                return Err(err.into());
            }
        };

        changes.extend(page.changes);
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => {
                new_cursor = page.new_cursor;
                break;
            }
        }
    }

    let set = ChangeSet::from_changes(&changes);
    let mut report = SyncReport::new(user_id, PassKind::Incremental);

    if set.is_empty() {
        debug!("No changes since {} for user {}", cursor, user_id);
    } else {
        info!(
            "Processing {} changes for user {}: {} to refresh, {} deleted",
            changes.len(),
            user_id,
            set.refresh.len(),
            set.deleted.len()
        );
    }

    let deleted: Vec<String> = set.deleted.into_iter().collect();
    report.deleted += emails::delete_emails(&ctx.pool, user_id, &deleted)?;

    let batch = worker::fetch_and_upsert(ctx, user_id, set.refresh.into_iter().collect()).await?;
    report.inserted = batch.inserted;
    report.updated = batch.updated;
    report.failed = batch.failed.len();
    report.deleted += emails::delete_emails(&ctx.pool, user_id, &batch.gone)?;

    let success = batch.failed.is_empty();
    if anchors.advance(user_id, &new_cursor, success)? {
        report.cursor = Some(new_cursor);
    } else if !success {
        let count = anchors.record_error(user_id)?;
        warn!(
            "Leaving cursor at {} for user {}: {} messages failed (consecutive errors: {})",
            cursor, user_id, report.failed, count
        );
    }

    info!(
        "Sync pass for user {} done: {} new, {} updated, {} deleted, {} failed",
        user_id, report.inserted, report.updated, report.deleted, report.failed
    );
    Ok(report)
}

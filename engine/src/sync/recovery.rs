//! Smart recovery (full baseline resync)
//!
//! Used when the provider rejects the stored cursor, and for users that have
//! no cursor yet. Takes the provider's current head as the new baseline,
//! backfills the most recent inbox messages through the worker pool, then
//! stores the baseline. Re-running it is harmless: backfilled messages are
//! upserted.

use tracing::{error, info, warn};

use super::{worker, PassKind, SyncContext, SyncReport};
use crate::adapters::sqlite::emails;
use crate::error::EngineError;

/// Recover a user's cursor. Errors are logged and reported in
/// [`SyncReport::error`], never returned: the next scheduled pass retries.
pub async fn recover(ctx: &SyncContext, user_id: &str, invalidated: Option<&str>) -> SyncReport {
    match invalidated {
        Some(cursor) => info!("Recovering user {} from invalid cursor {}", user_id, cursor),
        None => info!("No cursor for user {}, taking a fresh baseline", user_id),
    }

    let labels = [ctx.config.inbox_label.clone()];
    match rebuild_baseline(ctx, user_id, &labels, PassKind::Recovery).await {
        Ok(report) => report,
        Err(e) => {
            error!("Recovery failed for user {}: {}", user_id, e);
            if let Err(e) = ctx.anchors().record_error(user_id) {
                warn!("Could not record sync error for user {}: {}", user_id, e);
            }
            let mut report = SyncReport::new(user_id, PassKind::Recovery);
            report.error = Some(e.to_string());
            report
        }
    }
}

/// Take a baseline cursor, backfill the newest messages of each label, and
/// store the baseline once the backfill has run.
///
/// The cursor is read before listing so that anything arriving during the
/// backfill is still covered by the next incremental pass.
pub(crate) async fn rebuild_baseline(
    ctx: &SyncContext,
    user_id: &str,
    labels: &[String],
    kind: PassKind,
) -> Result<SyncReport, EngineError> {
    let anchors = ctx.anchors();
    let cursor = ctx.provider.get_profile_cursor(user_id).await?;

    let mut ids: Vec<String> = Vec::new();
    for label in labels {
        for id in list_recent(ctx, user_id, label, ctx.config.recovery_backfill_size).await? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    info!(
        "Backfilling {} messages for user {} from {:?}",
        ids.len(),
        user_id,
        labels
    );

    let batch = worker::fetch_and_upsert(ctx, user_id, ids).await?;

    let mut report = SyncReport::new(user_id, kind);
    report.inserted = batch.inserted;
    report.updated = batch.updated;
    report.failed = batch.failed.len();
    report.deleted = emails::delete_emails(&ctx.pool, user_id, &batch.gone)?;

    anchors.reset_baseline(user_id, &cursor)?;
    report.cursor = Some(cursor);

    info!(
        "Baseline for user {} stored at {}: {} new, {} updated, {} failed",
        user_id,
        report.cursor.as_deref().unwrap_or_default(),
        report.inserted,
        report.updated,
        report.failed
    );
    Ok(report)
}

/// Up to `limit` message ids carrying `label`, newest first.
async fn list_recent(
    ctx: &SyncContext,
    user_id: &str,
    label: &str,
    limit: usize,
) -> Result<Vec<String>, EngineError> {
    let mut ids = Vec::new();
    let mut page_token: Option<String> = None;

    while ids.len() < limit {
        let remaining = (limit - ids.len()).min(ctx.config.seed_page_size.max(1) as usize);
        let page = ctx
            .provider
            .list_messages(user_id, label, remaining as u32, page_token.as_deref())
            .await?;

        ids.extend(page.ids);
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    ids.truncate(limit);
    Ok(ids)
}

//! Initial seed for a user's first session
//!
//! Same baseline routine as recovery, but it also backfills every label the
//! user's board maps, so cards already sitting in label columns show up, and
//! failures are returned to the caller.

use tracing::info;

use super::{recovery, PassKind, SyncContext, SyncReport};
use crate::adapters::sqlite::columns;
use crate::error::EngineError;

pub async fn seed(ctx: &SyncContext, user_id: &str) -> Result<SyncReport, EngineError> {
    if let Some(anchor) = ctx.anchors().current(user_id)? {
        info!(
            "User {} already has cursor {}, re-seeding from a fresh baseline",
            user_id, anchor.cursor
        );
    }

    let labels = seed_labels(ctx, user_id)?;
    recovery::rebuild_baseline(ctx, user_id, &labels, PassKind::Seed).await
}

/// The inbox label followed by each mapped label in column order.
fn seed_labels(ctx: &SyncContext, user_id: &str) -> Result<Vec<String>, EngineError> {
    let board = columns::get_column_config(&ctx.pool, user_id)?;
    let mut ordered: Vec<_> = board.columns.iter().collect();
    ordered.sort_by_key(|c| c.order);

    let mut labels = vec![ctx.config.inbox_label.clone()];
    for column in ordered {
        if let Some(label) = &column.mapped_label {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
    }
    Ok(labels)
}

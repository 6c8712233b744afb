//! Mailbox synchronization
//!
//! - `anchor`: per-user cursor state and invalidation checks
//! - `worker`: bounded fetch-and-upsert pool shared by every pass
//! - `incremental`: change journal processing from the stored cursor
//! - `recovery`: full baseline resync when the cursor is rejected
//! - `seed`: first sync for a user with no cursor yet
//! - `scheduler`: per-user periodic trigger

pub mod anchor;
pub mod incremental;
pub mod recovery;
pub mod scheduler;
pub mod seed;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::provider::SharedProvider;
use crate::adapters::sqlite::DbPool;
use crate::config::EngineConfig;
use crate::error::EngineError;

pub use anchor::SyncAnchorManager;

/// Everything a sync pass needs, cheap to clone into tasks
#[derive(Clone)]
pub struct SyncContext {
    pub pool: DbPool,
    pub provider: SharedProvider,
    pub config: Arc<EngineConfig>,
}

impl SyncContext {
    pub fn new(pool: DbPool, provider: SharedProvider, config: Arc<EngineConfig>) -> Self {
        Self {
            pool,
            provider,
            config,
        }
    }

    pub fn anchors(&self) -> SyncAnchorManager {
        SyncAnchorManager::new(self.pool.clone(), self.provider.clone())
    }
}

/// Which path a pass took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassKind {
    /// Change journal read from the stored cursor
    Incremental,
    /// Cursor was rejected and a fresh baseline was taken
    Recovery,
    /// First sync for the user
    Seed,
}

/// Outcome of one sync pass for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub user_id: String,
    pub kind: PassKind,
    /// Records created
    pub inserted: usize,
    /// Existing records refreshed
    pub updated: usize,
    /// Records removed (journal deletions and messages gone on fetch)
    pub deleted: usize,
    /// Messages whose fetch or store failed; retried by the next pass
    pub failed: usize,
    /// Cursor stored at the end of the pass, if it moved
    pub cursor: Option<String>,
    /// Set when a recovery failed and was swallowed
    pub error: Option<String>,
}

impl SyncReport {
    pub fn new(user_id: &str, kind: PassKind) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            inserted: 0,
            updated: 0,
            deleted: 0,
            failed: 0,
            cursor: None,
            error: None,
        }
    }
}

/// Run one pass for a user: incremental when a cursor exists, otherwise a
/// cold baseline through the recovery path.
pub async fn run_pass(ctx: &SyncContext, user_id: &str) -> Result<SyncReport, EngineError> {
    match ctx.anchors().current(user_id)? {
        Some(anchor) => incremental::run(ctx, user_id, &anchor.cursor).await,
        None => Ok(recovery::recover(ctx, user_id, None).await),
    }
}

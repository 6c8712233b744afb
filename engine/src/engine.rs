//! Engine facade
//!
//! Owns the sync manager, the reconciliation listener and the move
//! reconciler for every user of one database. This is the surface the
//! application layer calls into.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::adapters::provider::SharedProvider;
use crate::adapters::sqlite::{self, columns, emails, DbPool};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::kanban::listener::{self, ListenerContext, ListenerHandle};
use crate::kanban::{remediation, MoveReconciler, RetryPolicy};
use crate::state::SyncManager;
use crate::sync::{SyncContext, SyncReport};
use crate::types::{Column, EmailRecord, KanbanColumnConfig, MoveResult, SyncState, SyncStats};

pub struct Engine {
    ctx: SyncContext,
    sync: SyncManager,
    reconciler: MoveReconciler,
    listener: Mutex<Option<ListenerHandle>>,
}

impl Engine {
    /// Open the database at `config.database_path` and start the engine.
    pub fn open(config: EngineConfig, provider: SharedProvider) -> Result<Self, EngineError> {
        let pool = sqlite::create_pool(&config.database_path)?;
        Self::start(config, pool, provider)
    }

    /// Start the reconciliation listener and re-queue moves left pending by
    /// a previous run.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: EngineConfig,
        pool: DbPool,
        provider: SharedProvider,
    ) -> Result<Self, EngineError> {
        let config = Arc::new(config);

        let listener_ctx = ListenerContext {
            pool: pool.clone(),
            provider: provider.clone(),
            policy: RetryPolicy::from_config(&config.reconcile),
        };
        let (queue, listener) = listener::spawn(listener_ctx, config.queue_capacity);

        let reconciler = MoveReconciler::new(pool.clone(), provider.clone(), config.clone(), queue);
        let ctx = SyncContext::new(pool, provider, config);

        let engine = Self {
            sync: SyncManager::new(ctx.clone()),
            ctx,
            reconciler,
            listener: Mutex::new(Some(listener)),
        };

        match engine.reconciler.resume_pending() {
            Ok(0) => {}
            Ok(n) => info!("Resumed {} reconciliations from the previous run", n),
            Err(e) => warn!("Failed to resume pending reconciliations: {}", e),
        }

        info!("Engine started");
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    // ========== Kanban ==========

    pub async fn move_email(
        &self,
        user_id: &str,
        email_id: &str,
        from_column_id: &str,
        to_column_id: &str,
        destination_index: Option<usize>,
    ) -> Result<MoveResult, EngineError> {
        self.reconciler
            .move_email(user_id, email_id, from_column_id, to_column_id, destination_index)
            .await
    }

    pub fn restore_email(&self, user_id: &str, email_id: &str) -> Result<MoveResult, EngineError> {
        self.reconciler.restore_email(user_id, email_id)
    }

    pub fn retry_failed_syncs(&self, user_id: &str) -> Result<usize, EngineError> {
        self.reconciler.retry_failed_syncs(user_id)
    }

    pub fn get_email(&self, user_id: &str, email_id: &str) -> Result<EmailRecord, EngineError> {
        emails::get_email(&self.ctx.pool, user_id, email_id)?
            .ok_or_else(|| EngineError::EmailNotFound(email_id.to_string()))
    }

    /// Cards of one column in board order
    pub fn list_column(&self, user_id: &str, column_id: &str) -> Result<Vec<EmailRecord>, EngineError> {
        emails::list_column(&self.ctx.pool, user_id, column_id)
    }

    pub fn get_column_config(&self, user_id: &str) -> Result<KanbanColumnConfig, EngineError> {
        columns::get_column_config(&self.ctx.pool, user_id)
    }

    pub fn save_column_config(
        &self,
        user_id: &str,
        config: &KanbanColumnConfig,
    ) -> Result<(), EngineError> {
        columns::save_column_config(&self.ctx.pool, user_id, config)?;
        info!(
            "Saved column config for user {} ({} columns)",
            user_id,
            config.columns.len()
        );
        Ok(())
    }

    pub async fn remap_column_label(
        &self,
        user_id: &str,
        column_id: &str,
        label_id: &str,
    ) -> Result<Column, EngineError> {
        remediation::remap_column_label(&self.ctx.pool, &self.ctx.provider, user_id, column_id, label_id)
            .await
    }

    pub async fn create_column_label(
        &self,
        user_id: &str,
        column_id: &str,
        name: &str,
        color: Option<&str>,
    ) -> Result<Column, EngineError> {
        remediation::create_column_label(
            &self.ctx.pool,
            &self.ctx.provider,
            user_id,
            column_id,
            name,
            color,
        )
        .await
    }

    // ========== Sync ==========

    /// Take the first baseline for a user.
    pub async fn trigger_initial_seed(&self, user_id: &str) -> Result<SyncReport, EngineError> {
        info!("Initial seed requested for user: {}", user_id);
        self.sync.seed(user_id).await
    }

    pub async fn sync_now(&self, user_id: &str) -> Result<SyncReport, EngineError> {
        self.sync.sync_now(user_id).await
    }

    pub fn is_syncing(&self, user_id: &str) -> bool {
        self.sync.is_syncing(user_id)
    }

    pub async fn start_scheduler(&self, user_id: &str) {
        self.sync.start_scheduler(user_id).await
    }

    pub async fn stop_scheduler(&self, user_id: &str) -> bool {
        self.sync.stop_scheduler(user_id).await
    }

    pub fn get_sync_stats(&self, user_id: &str) -> Result<SyncStats, EngineError> {
        let counts = emails::count_by_sync_state(&self.ctx.pool, user_id)?;
        let count = |state: SyncState| counts.get(&state).copied().unwrap_or(0);
        let board = columns::get_column_config(&self.ctx.pool, user_id)?;
        let anchor = self.ctx.anchors().current(user_id)?;

        Ok(SyncStats {
            total: counts.values().sum(),
            synced: count(SyncState::Synced),
            pending: count(SyncState::Pending),
            error: count(SyncState::Error),
            columns_with_label_errors: board.label_error_count(),
            last_sync_at: anchor.as_ref().and_then(|a| a.last_sync_at),
            mode: anchor.as_ref().map(|a| a.mode),
            anchor_error_count: anchor.map(|a| a.error_count).unwrap_or(0),
        })
    }

    // ========== Lifecycle ==========

    /// Stop every scheduler, then close the reconciliation queue. Moves whose
    /// reconciliation had not finished stay pending and are resumed by the
    /// next [`Engine::start`].
    pub async fn shutdown(&self) {
        info!("Shutting down engine");
        self.sync.shutdown().await;
        if let Some(listener) = self.listener.lock().await.take() {
            listener.shutdown().await;
        }
    }
}

//! Sync manager state
//!
//! Tracks, per user, the running scheduler and the sync pass in flight. Only
//! one pass per user runs at a time. An explicit trigger while a pass is
//! running joins it and gets the same report. A scheduler tick while a pass is
//! running does nothing and waits for the next interval. A seed waits for the
//! running pass and then takes its place.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::sync::scheduler::SchedulerHandle;
use crate::sync::{self, seed, SyncContext, SyncReport};

/// What a registered pass runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassRequest {
    /// Incremental, or recovery when there is no usable cursor
    Sync,
    Seed,
}

type PassFuture = Shared<BoxFuture<'static, Result<SyncReport, EngineError>>>;

/// In-flight sync passes keyed by user id
#[derive(Clone, Default)]
pub struct PassRegistry {
    passes: Arc<Mutex<HashMap<String, PassFuture>>>,
}

/// Removes the registry entry when the pass finishes (or is dropped).
struct InFlightGuard {
    passes: Arc<Mutex<HashMap<String, PassFuture>>>,
    user_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
    }
}

impl PassRegistry {
    pub fn is_in_flight(&self, user_id: &str) -> bool {
        self.passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user_id)
    }

    /// Return the pass in flight for `user_id`, starting one if there is none.
    pub fn join_or_start(&self, ctx: &SyncContext, user_id: &str) -> PassFuture {
        let mut passes = self.passes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pass) = passes.get(user_id) {
            debug!("Joining sync pass in flight for user: {}", user_id);
            return pass.clone();
        }

        let pass = self.spawn_pass(ctx, user_id, PassRequest::Sync);
        passes.insert(user_id.to_string(), pass.clone());
        pass
    }

    /// Run an initial seed once no other pass is in flight for `user_id`.
    pub async fn seed(&self, ctx: &SyncContext, user_id: &str) -> Result<SyncReport, EngineError> {
        loop {
            let slot = {
                let mut passes = self.passes.lock().unwrap_or_else(PoisonError::into_inner);
                match passes.get(user_id) {
                    Some(pass) => Err(pass.clone()),
                    None => {
                        let pass = self.spawn_pass(ctx, user_id, PassRequest::Seed);
                        passes.insert(user_id.to_string(), pass.clone());
                        Ok(pass)
                    }
                }
            };
            match slot {
                Ok(seed) => return seed.await,
                Err(in_flight) => {
                    debug!("Seed for user {} waiting on the pass in flight", user_id);
                    let _ = in_flight.await;
                }
            }
        }
    }

    /// Start a pass unless one is already in flight. Returns whether it started.
    pub fn start_if_idle(&self, ctx: &SyncContext, user_id: &str) -> bool {
        let mut passes = self.passes.lock().unwrap_or_else(PoisonError::into_inner);
        if passes.contains_key(user_id) {
            debug!("Sync pass already in flight for user {}, skipping tick", user_id);
            return false;
        }

        let pass = self.spawn_pass(ctx, user_id, PassRequest::Sync);
        passes.insert(user_id.to_string(), pass);
        true
    }

    /// Build the shared pass future and drive it on its own task, so it runs
    /// to completion even when every caller stops waiting.
    ///
    /// Must be called with the registry lock held; the guard only takes the
    /// lock once the pass completes.
    fn spawn_pass(&self, ctx: &SyncContext, user_id: &str, request: PassRequest) -> PassFuture {
        let ctx = ctx.clone();
        let guard = InFlightGuard {
            passes: self.passes.clone(),
            user_id: user_id.to_string(),
        };

        let pass = async move {
            let guard = guard;
            let result = match request {
                PassRequest::Sync => sync::run_pass(&ctx, &guard.user_id).await,
                PassRequest::Seed => seed::seed(&ctx, &guard.user_id).await,
            };
            if let Err(e) = &result {
                warn!("Sync pass failed for user {}: {}", guard.user_id, e);
            }
            result
        }
        .boxed()
        .shared();

        tokio::spawn(pass.clone());
        pass
    }
}

/// Per-user schedulers plus the pass registry they feed
pub struct SyncManager {
    ctx: SyncContext,
    passes: PassRegistry,
    schedulers: RwLock<HashMap<String, SchedulerHandle>>,
}

impl SyncManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            passes: PassRegistry::default(),
            schedulers: RwLock::new(HashMap::new()),
        }
    }

    /// Run a pass now, or join the one in flight, and wait for its report.
    pub async fn sync_now(&self, user_id: &str) -> Result<SyncReport, EngineError> {
        self.passes.join_or_start(&self.ctx, user_id).await
    }

    /// Initial seed for a user, serialized with any other pass.
    pub async fn seed(&self, user_id: &str) -> Result<SyncReport, EngineError> {
        self.passes.seed(&self.ctx, user_id).await
    }

    pub fn is_syncing(&self, user_id: &str) -> bool {
        self.passes.is_in_flight(user_id)
    }

    /// Bind the periodic trigger to a user session. Idempotent.
    pub async fn start_scheduler(&self, user_id: &str) {
        let mut schedulers = self.schedulers.write().await;
        if let Some(handle) = schedulers.get(user_id) {
            if handle.is_running() {
                debug!("Scheduler already running for user: {}", user_id);
                return;
            }
        }

        let ctx = self.ctx.clone();
        let passes = self.passes.clone();
        let user = user_id.to_string();
        let handle = SchedulerHandle::spawn(user_id, self.ctx.config.poll_interval(), move || {
            passes.start_if_idle(&ctx, &user);
        });

        if let Some(stale) = schedulers.insert(user_id.to_string(), handle) {
            stale.stop().await;
        }
        info!("Sync scheduler started for user: {}", user_id);
    }

    /// Stop a user's scheduler. Returns whether one was running.
    pub async fn stop_scheduler(&self, user_id: &str) -> bool {
        let handle = self.schedulers.write().await.remove(user_id);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn scheduled_users(&self) -> Vec<String> {
        self.schedulers.read().await.keys().cloned().collect()
    }

    /// Stop every scheduler.
    pub async fn shutdown(&self) {
        let handles: Vec<SchedulerHandle> = self.schedulers.write().await.drain().map(|(_, h)| h).collect();
        info!("Stopping {} sync schedulers", handles.len());
        for handle in handles {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::provider::memory::InMemoryProvider;
    use crate::adapters::sqlite::create_memory_pool;
    use crate::config::EngineConfig;
    use std::time::Duration;

    fn manager() -> (SyncManager, Arc<InMemoryProvider>) {
        let provider = Arc::new(InMemoryProvider::new());
        let config = EngineConfig {
            poll_interval_seconds: 60,
            ..EngineConfig::default()
        };
        let ctx = SyncContext::new(create_memory_pool().unwrap(), provider.clone(), Arc::new(config));
        (SyncManager::new(ctx), provider)
    }

    #[tokio::test]
    async fn test_concurrent_triggers_share_one_pass() {
        let (manager, provider) = manager();
        provider.insert_message("m1", &["INBOX"]);

        let (a, b) = tokio::join!(manager.sync_now("u1"), manager.sync_now("u1"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a, b);
        assert_eq!(a.inserted, 1);
        assert_eq!(provider.metadata_fetches(), vec!["m1".to_string()]);
        assert!(!manager.is_syncing("u1"));
    }

    #[tokio::test]
    async fn test_tick_while_in_flight_is_noop() {
        let (manager, _) = manager();
        let registry = manager.passes.clone();

        let joined = registry.join_or_start(&manager.ctx, "u1");
        assert!(registry.is_in_flight("u1"));
        assert!(!registry.start_if_idle(&manager.ctx, "u1"));

        joined.await.unwrap();
        assert!(!registry.is_in_flight("u1"));
        assert!(registry.start_if_idle(&manager.ctx, "u1"));
    }

    #[tokio::test]
    async fn test_seed_runs_after_pass_in_flight() {
        let (manager, provider) = manager();
        provider.insert_message("m1", &["INBOX"]);

        let running = manager.passes.join_or_start(&manager.ctx, "u1");
        let seeded = manager.seed("u1").await.unwrap();

        assert_eq!(seeded.kind, sync::PassKind::Seed);
        assert_eq!(running.await.unwrap().kind, sync::PassKind::Recovery);
        assert!(!manager.is_syncing("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_lifecycle() {
        let (manager, provider) = manager();
        provider.insert_message("m1", &["INBOX"]);

        manager.start_scheduler("u1").await;
        manager.start_scheduler("u1").await;
        assert_eq!(manager.scheduled_users().await, vec!["u1".to_string()]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.metadata_fetches().len(), 1);

        // Second tick reads the journal from the baseline taken by the first
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.journal_cursors().len(), 1);

        assert!(manager.stop_scheduler("u1").await);
        assert!(!manager.stop_scheduler("u1").await);
    }
}

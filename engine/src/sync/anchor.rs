//! Sync anchor manager
//!
//! Owns the per-user change journal cursor: taking a baseline from the
//! provider, moving it forward after a successful pass, and telling an
//! invalidated cursor apart from a transient failure. It never retries.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::adapters::provider::SharedProvider;
use crate::adapters::sqlite::{anchors, DbPool};
use crate::classify;
use crate::error::{EngineError, ProviderError};
use crate::types::{SyncAnchor, SyncMode};

#[derive(Clone)]
pub struct SyncAnchorManager {
    pool: DbPool,
    provider: SharedProvider,
}

impl SyncAnchorManager {
    pub fn new(pool: DbPool, provider: SharedProvider) -> Self {
        Self { pool, provider }
    }

    pub fn current(&self, user_id: &str) -> Result<Option<SyncAnchor>, EngineError> {
        anchors::get_anchor(&self.pool, user_id)
    }

    /// Fetch the provider's current head and store it as the baseline.
    pub async fn initialize(&self, user_id: &str) -> Result<SyncAnchor, EngineError> {
        let cursor = self.provider.get_profile_cursor(user_id).await?;
        info!("Initialized sync anchor for user {} at {}", user_id, cursor);
        self.reset_baseline(user_id, &cursor)
    }

    /// Store a freshly issued baseline, replacing whatever was there.
    pub fn reset_baseline(&self, user_id: &str, cursor: &str) -> Result<SyncAnchor, EngineError> {
        anchors::set_cursor(&self.pool, user_id, cursor, SyncMode::Full, Utc::now())?;
        self.current(user_id)?
            .ok_or_else(|| EngineError::NoSyncAnchor(user_id.to_string()))
    }

    /// Move the cursor to `new_cursor` when the caller reports success.
    ///
    /// Returns whether the stored cursor changed. A cursor that would move
    /// backwards (both numeric and smaller) is refused.
    pub fn advance(
        &self,
        user_id: &str,
        new_cursor: &str,
        success: bool,
    ) -> Result<bool, EngineError> {
        if !success {
            debug!("Not advancing cursor for user {}: pass incomplete", user_id);
            return Ok(false);
        }

        if let Some(existing) = self.current(user_id)? {
            if is_backwards(&existing.cursor, new_cursor) {
                warn!(
                    "Refusing to move cursor backwards for user {}: {} -> {}",
                    user_id, existing.cursor, new_cursor
                );
                return Ok(false);
            }
        }

        anchors::set_cursor(&self.pool, user_id, new_cursor, SyncMode::History, Utc::now())?;
        debug!("Advanced cursor for user {} to {}", user_id, new_cursor);
        Ok(true)
    }

    /// Whether a change journal error means the cursor is expired or unknown.
    pub fn is_invalid(&self, err: &ProviderError) -> bool {
        classify::is_cursor_invalid(err)
    }

    /// Count a failed pass against the anchor.
    pub fn record_error(&self, user_id: &str) -> Result<u32, EngineError> {
        anchors::record_error(&self.pool, user_id)
    }
}

/// Cursors are opaque, but when both sides are numeric the order is known.
fn is_backwards(current: &str, candidate: &str) -> bool {
    match (current.parse::<u64>(), candidate.parse::<u64>()) {
        (Ok(current), Ok(candidate)) => candidate < current,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::provider::memory::InMemoryProvider;
    use crate::adapters::sqlite::create_memory_pool;
    use std::sync::Arc;

    fn manager() -> (SyncAnchorManager, Arc<InMemoryProvider>) {
        let provider = Arc::new(InMemoryProvider::new());
        let manager = SyncAnchorManager::new(create_memory_pool().unwrap(), provider.clone());
        (manager, provider)
    }

    #[tokio::test]
    async fn test_initialize_stores_profile_cursor() {
        let (manager, provider) = manager();
        provider.deliver("m1", &["INBOX"]);
        provider.deliver("m2", &["INBOX"]);

        let anchor = manager.initialize("u1").await.unwrap();
        assert_eq!(anchor.cursor, "2");
        assert_eq!(anchor.mode, SyncMode::Full);
        assert_eq!(anchor.error_count, 0);
    }

    #[test]
    fn test_advance_requires_success() {
        let (manager, _) = manager();
        manager.reset_baseline("u1", "10").unwrap();

        assert!(!manager.advance("u1", "12", false).unwrap());
        assert_eq!(manager.current("u1").unwrap().unwrap().cursor, "10");

        assert!(manager.advance("u1", "12", true).unwrap());
        let anchor = manager.current("u1").unwrap().unwrap();
        assert_eq!(anchor.cursor, "12");
        assert_eq!(anchor.mode, SyncMode::History);
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let (manager, _) = manager();
        manager.reset_baseline("u1", "50").unwrap();

        assert!(!manager.advance("u1", "49", true).unwrap());
        assert_eq!(manager.current("u1").unwrap().unwrap().cursor, "50");

        // Same value is allowed (empty poll)
        assert!(manager.advance("u1", "50", true).unwrap());
    }

    #[test]
    fn test_opaque_cursors_always_advance() {
        assert!(!is_backwards("abc", "abb"));
        assert!(!is_backwards("10", "zz"));
        assert!(is_backwards("10", "9"));
    }

    #[test]
    fn test_is_invalid() {
        let (manager, _) = manager();
        assert!(manager.is_invalid(&ProviderError::new(404, "Not Found")));
        assert!(manager.is_invalid(&ProviderError::new(400, "Invalid history ID")));
        assert!(!manager.is_invalid(&ProviderError::new(503, "Service Unavailable")));
    }
}

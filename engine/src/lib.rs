//! Mailboard engine - mailbox sync and Kanban label reconciliation
//!
//! Keeps a local mirror of a user's mailbox in step with the remote provider
//! and pushes Kanban column moves back as label changes.
//!
//! ## Module Organization
//!
//! - `engine`: facade the application layer calls into
//! - `sync/`: anchor, incremental and recovery passes, seed, worker pool, scheduler
//! - `kanban/`: column moves, label deltas, reconciliation listener and retry
//! - `state/`: per-user pass and scheduler registries
//! - `adapters/`: mailbox provider seam and SQLite persistence
//! - `classify`: provider error classification
//! - `config/`: engine configuration
//! - `types/`: data structures shared by the modules above

pub mod adapters;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod kanban;
pub mod state;
pub mod sync;
pub mod types;

pub use adapters::provider::{MailboxProvider, SharedProvider};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ProviderError, Result};
pub use sync::{PassKind, SyncReport};
pub use types::{Column, EmailRecord, KanbanColumnConfig, MoveResult, SyncStats};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this again once a
/// subscriber is installed does nothing.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailboard_engine=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

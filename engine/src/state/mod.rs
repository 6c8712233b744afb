//! Shared engine state
//!
//! Thread-safe registries owned by the engine facade.

mod sync_manager;

pub use sync_manager::{PassRegistry, SyncManager};

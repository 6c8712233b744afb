//! Kanban board reconciliation
//!
//! Local column moves are the source of truth for placement. Remote labels
//! follow asynchronously:
//!
//! - `reconciler`: optimistic local write and event emission
//! - `labels`: label delta for a move
//! - `listener`: queue consumer that pushes label changes to the provider
//! - `retry`: backoff state machine used by the listener
//! - `remediation`: remapping columns whose label disappeared

pub mod labels;
pub mod listener;
pub mod reconciler;
pub mod remediation;
pub mod retry;

pub use labels::{compute_label_delta, LabelDelta};
pub use listener::{ListenerContext, ListenerHandle, ReconcileQueue};
pub use reconciler::MoveReconciler;
pub use retry::{ReconcileState, RetryPolicy};

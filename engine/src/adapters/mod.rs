//! External collaborators: the mailbox provider seam and SQLite persistence.

pub mod provider;
pub mod sqlite;

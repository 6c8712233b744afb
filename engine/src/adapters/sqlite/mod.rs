pub mod anchors;
pub mod columns;
pub mod emails;
pub mod pool;
pub mod schema;

// Re-export the pool helpers so callers can do `use crate::adapters::sqlite::DbPool`
pub use pool::{create_memory_pool, create_pool, DbPool};

use chrono::{DateTime, TimeZone, Utc};

pub(crate) fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

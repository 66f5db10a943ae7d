// src/db/mod.rs
// Storage layer: connection pool, versioned schema, and per-layer sync
// operation modules. All functions here are synchronous and run on a pooled
// connection via `DatabasePool::interact`.

pub mod affect;
pub mod companion;
pub mod config;
pub mod consolidation;
pub mod echo;
pub mod embedding_cache;
pub mod pool;
pub mod river;
pub mod salience;
pub mod schema;

#[cfg(test)]
pub mod test_support;

pub use pool::DatabasePool;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

/// Current time as the canonical column format: RFC 3339 UTC with
/// microsecond precision. Fixed width, so TEXT ordering matches time
/// ordering.
pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Render a timestamp in the canonical column format
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, falling back to epoch on invalid values
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn!("Invalid timestamp value: {}, using epoch", s);
            DateTime::UNIX_EPOCH
        })
}

/// Parse an optional stored timestamp
pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_ts(&v))
}

/// Fresh opaque identifier for a new row
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

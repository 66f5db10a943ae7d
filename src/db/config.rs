// src/db/config.rs
// Persisted engine configuration: the memory_config key/value table

use super::now_ts;
use crate::config::MemoryConfig;
use crate::error::Result;
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::warn;

/// Load the effective configuration: defaults overlaid with persisted rows.
///
/// Rows that fail validation are skipped with a warning rather than
/// poisoning the whole snapshot.
pub fn load_config_sync(conn: &Connection) -> rusqlite::Result<MemoryConfig> {
    let mut config = MemoryConfig::default();

    let mut stmt = conn.prepare("SELECT key, value FROM memory_config")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    for row in rows {
        let (key, value) = row?;
        if let Err(e) = config.apply(&key, &value) {
            warn!("Ignoring persisted config row {key}={value}: {e}");
        }
    }

    Ok(config)
}

/// Read every persisted row as-is
pub fn all_values_sync(conn: &Connection) -> rusqlite::Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM memory_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut map = BTreeMap::new();
    for row in rows {
        let (key, value) = row?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Patch one key. The value is validated against the key's type before
/// anything is written; unknown keys are rejected.
pub fn patch_value_sync(conn: &Connection, key: &str, value: &str) -> Result<()> {
    // Validate by applying to a scratch snapshot
    let mut scratch = MemoryConfig::default();
    scratch.apply(key, value)?;

    conn.execute(
        "INSERT INTO memory_config (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, value, now_ts()],
    )?;
    Ok(())
}

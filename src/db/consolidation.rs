// src/db/consolidation.rs
// Bookkeeping for consolidation runs

use super::{new_id, now_ts, parse_ts, parse_ts_opt};
use crate::types::{ConsolidationRun, TriggerType};
use rusqlite::{Connection, Row};
use std::str::FromStr;

fn row_to_run(row: &Row) -> rusqlite::Result<ConsolidationRun> {
    let trigger_raw: String = row.get("trigger_type")?;
    Ok(ConsolidationRun {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        trigger_type: TriggerType::from_str(&trigger_raw).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown trigger type {trigger_raw:?}").into(),
            )
        })?,
        items_processed: row.get::<_, i64>("items_processed")?.max(0) as u64,
        summaries_created: row.get::<_, i64>("summaries_created")?.max(0) as u64,
        conflicts_detected: row.get::<_, i64>("conflicts_detected")?.max(0) as u64,
        started_at: parse_ts(&row.get::<_, String>("started_at")?),
        completed_at: parse_ts_opt(row.get::<_, Option<String>>("completed_at")?),
    })
}

/// Open a new run row with completed_at NULL. Returns the run id.
pub fn open_run_sync(
    conn: &Connection,
    chat_id: &str,
    trigger: TriggerType,
) -> rusqlite::Result<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO consolidation_runs
            (id, chat_id, trigger_type, items_processed, summaries_created,
             conflicts_detected, started_at, completed_at)
         VALUES (?1, ?2, ?3, 0, 0, 0, ?4, NULL)",
        rusqlite::params![id, chat_id, trigger.as_str(), now_ts()],
    )?;
    Ok(id)
}

/// Close a run with its observed counters
pub fn close_run_sync(
    conn: &Connection,
    run_id: &str,
    items_processed: u64,
    summaries_created: u64,
    conflicts_detected: u64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE consolidation_runs
         SET items_processed = ?1, summaries_created = ?2, conflicts_detected = ?3,
             completed_at = ?4
         WHERE id = ?5",
        rusqlite::params![
            items_processed as i64,
            summaries_created as i64,
            conflicts_detected as i64,
            now_ts(),
            run_id
        ],
    )?;
    Ok(())
}

/// Fetch one run by id
pub fn get_run_sync(conn: &Connection, run_id: &str) -> rusqlite::Result<ConsolidationRun> {
    conn.query_row(
        "SELECT id, chat_id, trigger_type, items_processed, summaries_created,
                conflicts_detected, started_at, completed_at
         FROM consolidation_runs WHERE id = ?1",
        [run_id],
        row_to_run,
    )
}

/// Recent runs for a chat, newest first
pub fn recent_runs_sync(
    conn: &Connection,
    chat_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<ConsolidationRun>> {
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, trigger_type, items_processed, summaries_created,
                conflicts_detected, started_at, completed_at
         FROM consolidation_runs
         WHERE chat_id = ?1
         ORDER BY started_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![chat_id, limit as i64], row_to_run)?;
    rows.collect()
}

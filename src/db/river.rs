// src/db/river.rs
// L1 recency river: sliding token-bounded buffer with logical eviction

use super::{format_ts, new_id, now_ts, parse_ts, parse_ts_opt};
use crate::types::{RiverEntry, RiverStats};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use tracing::debug;

fn row_to_entry(row: &Row) -> rusqlite::Result<RiverEntry> {
    Ok(RiverEntry {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        message_id: row.get("message_id")?,
        content: row.get("content")?,
        token_count: row.get::<_, i64>("token_count")? as u32,
        timestamp: parse_ts(&row.get::<_, String>("timestamp")?),
        evicted_at: parse_ts_opt(row.get::<_, Option<String>>("evicted_at")?),
    })
}

/// Insert a new river entry with the current timestamp
pub fn add_entry_sync(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    content: &str,
    token_count: u32,
) -> rusqlite::Result<RiverEntry> {
    let id = new_id();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO l1_river (id, chat_id, message_id, content, token_count, timestamp, evicted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
        rusqlite::params![id, chat_id, message_id, content, token_count, format_ts(now)],
    )?;

    debug!("River entry {} added for chat {}", id, chat_id);

    Ok(RiverEntry {
        id,
        chat_id: chat_id.to_string(),
        message_id: message_id.to_string(),
        content: content.to_string(),
        token_count,
        timestamp: now,
        evicted_at: None,
    })
}

/// Non-evicted rows, newest first
pub fn get_recent_sync(
    conn: &Connection,
    chat_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<RiverEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, message_id, content, token_count, timestamp, evicted_at
         FROM l1_river
         WHERE chat_id = ?1 AND evicted_at IS NULL
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(
        rusqlite::params![chat_id, limit as i64],
        row_to_entry,
    )?;
    rows.collect()
}

/// Sum of token_count over non-evicted rows
pub fn token_count_sync(conn: &Connection, chat_id: &str) -> rusqlite::Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(token_count), 0) FROM l1_river
         WHERE chat_id = ?1 AND evicted_at IS NULL",
        [chat_id],
        |row| row.get(0),
    )?;
    Ok(total.max(0) as u64)
}

/// Count, tokens, and timestamp range over the live rows of a chat
pub fn stats_sync(conn: &Connection, chat_id: &str) -> rusqlite::Result<RiverStats> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(token_count), 0), MIN(timestamp), MAX(timestamp)
         FROM l1_river
         WHERE chat_id = ?1 AND evicted_at IS NULL",
        [chat_id],
        |row| {
            Ok(RiverStats {
                entry_count: row.get::<_, i64>(0)? as u64,
                token_count: row.get::<_, i64>(1)?.max(0) as u64,
                oldest: parse_ts_opt(row.get::<_, Option<String>>(2)?),
                newest: parse_ts_opt(row.get::<_, Option<String>>(3)?),
            })
        },
    )
}

/// Evict oldest-first until the live token sum fits within `max_tokens`.
///
/// Eviction is logical: rows get an evicted_at tombstone and stay readable
/// for lexical lookups. Each entry is marked in its own statement, so
/// partial progress survives a mid-run failure.
pub fn evict_to_budget_sync(
    conn: &Connection,
    chat_id: &str,
    max_tokens: u32,
) -> rusqlite::Result<Vec<RiverEntry>> {
    let mut remaining = token_count_sync(conn, chat_id)?;
    if remaining <= max_tokens as u64 {
        return Ok(Vec::new());
    }

    let candidates: Vec<RiverEntry> = {
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, message_id, content, token_count, timestamp, evicted_at
             FROM l1_river
             WHERE chat_id = ?1 AND evicted_at IS NULL
             ORDER BY timestamp ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([chat_id], row_to_entry)?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut evicted = Vec::new();
    for mut entry in candidates {
        if remaining <= max_tokens as u64 {
            break;
        }

        let now = now_ts();
        let changed = conn.execute(
            "UPDATE l1_river SET evicted_at = ?1 WHERE id = ?2 AND evicted_at IS NULL",
            rusqlite::params![now, entry.id],
        )?;
        if changed == 0 {
            // Another writer got here first; its tokens no longer count
            remaining = token_count_sync(conn, chat_id)?;
            continue;
        }

        remaining = remaining.saturating_sub(entry.token_count as u64);
        entry.evicted_at = Some(parse_ts(&now));
        evicted.push(entry);
    }

    debug!(
        "Evicted {} river entries from chat {} ({} tokens live)",
        evicted.len(),
        chat_id,
        remaining
    );

    Ok(evicted)
}

/// Distinct chat ids that still have live river rows
pub fn active_chats_sync(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT chat_id FROM l1_river WHERE evicted_at IS NULL ORDER BY chat_id",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Live (non-evicted) entries scored for recency by the retriever.
/// Newest first, like `get_recent_sync`, kept separate so retrieval can
/// evolve its own projection.
pub fn recency_candidates_sync(
    conn: &Connection,
    chat_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<(String, String, DateTime<Utc>)>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, content, timestamp FROM l1_river
         WHERE chat_id = ?1 AND evicted_at IS NULL
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![chat_id, limit as i64], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            parse_ts(&row.get::<_, String>(2)?),
        ))
    })?;
    rows.collect()
}

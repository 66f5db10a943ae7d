// src/db/salience.rs
// L4 salience store: heuristic-scored and user-pinned retention.
// One row per message; pinning forces score 1.0 and priority 100.

use super::{new_id, now_ts, parse_ts};
use crate::types::SalienceEntry;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::debug;

/// Filters for reading salience entries
#[derive(Debug, Clone)]
pub struct SalienceQuery {
    pub min_score: f32,
    pub pinned_only: bool,
    pub limit: usize,
    pub include_muted: bool,
}

impl Default for SalienceQuery {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            pinned_only: false,
            limit: 50,
            include_muted: false,
        }
    }
}

fn row_to_entry(row: &Row) -> rusqlite::Result<SalienceEntry> {
    Ok(SalienceEntry {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        message_id: row.get("message_id")?,
        content: row.get("content")?,
        salience_score: row.get("salience_score")?,
        prediction_error: row.get("prediction_error")?,
        user_pinned: row.get::<_, i64>("user_pinned")? != 0,
        retention_priority: row.get::<_, i64>("retention_priority")?.clamp(0, 100) as u8,
        is_muted: row.get::<_, i64>("is_muted")? != 0,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        last_accessed_at: parse_ts(&row.get::<_, String>("last_accessed_at")?),
    })
}

fn get_by_message(conn: &Connection, message_id: &str) -> rusqlite::Result<SalienceEntry> {
    conn.query_row(
        "SELECT id, chat_id, message_id, content, salience_score, prediction_error,
                user_pinned, retention_priority, is_muted, created_at, last_accessed_at
         FROM l4_salience WHERE message_id = ?1",
        [message_id],
        row_to_entry,
    )
}

/// Upsert a scored entry by message_id.
///
/// retention_priority = floor(score * 100). A pinned row keeps its pin
/// (and forced score/priority) even when re-scored.
pub fn add_entry_sync(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    content: &str,
    salience_score: f32,
    prediction_error: Option<f32>,
) -> rusqlite::Result<SalienceEntry> {
    let score = salience_score.clamp(0.0, 1.0);
    let priority = (score * 100.0).floor() as i64;
    let now = now_ts();

    let existing: Option<(String, bool)> = conn
        .query_row(
            "SELECT id, user_pinned FROM l4_salience WHERE message_id = ?1",
            [message_id],
            |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
        )
        .optional()?;

    match existing {
        Some((id, pinned)) if pinned => {
            // Pin wins: refresh content and prediction error only
            conn.execute(
                "UPDATE l4_salience SET content = ?1, prediction_error = ?2 WHERE id = ?3",
                rusqlite::params![content, prediction_error, id],
            )?;
        }
        Some((id, _)) => {
            conn.execute(
                "UPDATE l4_salience
                 SET content = ?1, salience_score = ?2, prediction_error = ?3,
                     retention_priority = ?4
                 WHERE id = ?5",
                rusqlite::params![content, score, prediction_error, priority, id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO l4_salience
                    (id, chat_id, message_id, content, salience_score, prediction_error,
                     user_pinned, retention_priority, is_muted, created_at, last_accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 0, ?8, ?8)",
                rusqlite::params![
                    new_id(),
                    chat_id,
                    message_id,
                    content,
                    score,
                    prediction_error,
                    priority,
                    now
                ],
            )?;
            debug!("Salience entry added for message {} ({:.2})", message_id, score);
        }
    }

    get_by_message(conn, message_id)
}

/// Pin a message: upsert forcing user_pinned, score 1.0, priority 100
pub fn pin_sync(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    content: &str,
) -> rusqlite::Result<SalienceEntry> {
    let now = now_ts();
    let updated = conn.execute(
        "UPDATE l4_salience
         SET user_pinned = 1, salience_score = 1.0, retention_priority = 100, content = ?1
         WHERE message_id = ?2",
        rusqlite::params![content, message_id],
    )?;

    if updated == 0 {
        conn.execute(
            "INSERT INTO l4_salience
                (id, chat_id, message_id, content, salience_score, prediction_error,
                 user_pinned, retention_priority, is_muted, created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, 1.0, NULL, 1, 100, 0, ?5, ?5)",
            rusqlite::params![new_id(), chat_id, message_id, content, now],
        )?;
    }

    debug!("Message {} pinned", message_id);
    get_by_message(conn, message_id)
}

/// Read entries ordered by retention_priority then salience_score
/// descending. Touches last_accessed_at for returned rows in one update.
pub fn get_entries_sync(
    conn: &Connection,
    chat_id: &str,
    query: &SalienceQuery,
) -> rusqlite::Result<Vec<SalienceEntry>> {
    let entries: Vec<SalienceEntry> = {
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, message_id, content, salience_score, prediction_error,
                    user_pinned, retention_priority, is_muted, created_at, last_accessed_at
             FROM l4_salience
             WHERE chat_id = ?1
               AND salience_score >= ?2
               AND (?3 = 0 OR user_pinned = 1)
               AND (?4 OR is_muted = 0)
             ORDER BY retention_priority DESC, salience_score DESC, rowid ASC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                chat_id,
                query.min_score,
                query.pinned_only as i64,
                query.include_muted,
                query.limit as i64
            ],
            row_to_entry,
        )?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    if !entries.is_empty() {
        let placeholders: Vec<String> = (0..entries.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "UPDATE l4_salience SET last_accessed_at = ?1 WHERE id IN ({})",
            placeholders.join(", ")
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(entries.len() + 1);
        params.push(Box::new(now_ts()));
        for entry in &entries {
            params.push(Box::new(entry.id.clone()));
        }
        conn.execute(&sql, rusqlite::params_from_iter(params))?;
    }

    Ok(entries)
}

/// Entry count for one chat (stats)
pub fn count_sync(conn: &Connection, chat_id: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM l4_salience WHERE chat_id = ?1",
        [chat_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn add_derives_priority_from_score() {
        let conn = setup_test_connection();
        let entry = add_entry_sync(&conn, "c1", "m1", "notable", 0.73, None).unwrap();
        assert_eq!(entry.retention_priority, 73);
        assert!(!entry.user_pinned);
    }

    #[test]
    fn add_upserts_by_message_id() {
        let conn = setup_test_connection();
        let first = add_entry_sync(&conn, "c1", "m1", "v1", 0.5, None).unwrap();
        let second = add_entry_sync(&conn, "c1", "m1", "v2", 0.9, Some(0.2)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.content, "v2");
        assert_eq!(second.retention_priority, 90);
        assert_eq!(count_sync(&conn, "c1").unwrap(), 1);
    }

    #[test]
    fn pin_forces_score_and_priority() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", "bland", 0.1, None).unwrap();
        let pinned = pin_sync(&conn, "c1", "m1", "bland").unwrap();
        assert!(pinned.user_pinned);
        assert_eq!(pinned.salience_score, 1.0);
        assert_eq!(pinned.retention_priority, 100);

        // Pin works on a message with no prior row too
        let fresh = pin_sync(&conn, "c1", "m2", "new pin").unwrap();
        assert!(fresh.user_pinned);
        assert_eq!(fresh.retention_priority, 100);
    }

    #[test]
    fn rescoring_does_not_unpin() {
        let conn = setup_test_connection();
        pin_sync(&conn, "c1", "m1", "pinned").unwrap();
        let rescored = add_entry_sync(&conn, "c1", "m1", "pinned v2", 0.05, None).unwrap();
        assert!(rescored.user_pinned);
        assert_eq!(rescored.salience_score, 1.0);
        assert_eq!(rescored.retention_priority, 100);
        assert_eq!(rescored.content, "pinned v2");
    }

    #[test]
    fn pinned_bland_message_outranks_salient_one() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", "error bug failed", 0.9, None).unwrap();
        add_entry_sync(&conn, "c1", "m2", "nothing much", 0.1, None).unwrap();
        pin_sync(&conn, "c1", "m2", "nothing much").unwrap();

        let entries = get_entries_sync(&conn, "c1", &SalienceQuery::default()).unwrap();
        assert_eq!(entries[0].message_id, "m2");
        assert_eq!(entries[1].message_id, "m1");
    }

    #[test]
    fn get_filters_min_score_pinned_and_muted() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", "a", 0.9, None).unwrap();
        add_entry_sync(&conn, "c1", "m2", "b", 0.3, None).unwrap();
        pin_sync(&conn, "c1", "m3", "c").unwrap();
        conn.execute("UPDATE l4_salience SET is_muted = 1 WHERE message_id = 'm1'", [])
            .unwrap();

        let pinned = get_entries_sync(
            &conn,
            "c1",
            &SalienceQuery {
                pinned_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].message_id, "m3");

        let strong = get_entries_sync(
            &conn,
            "c1",
            &SalienceQuery {
                min_score: 0.5,
                include_muted: true,
                ..Default::default()
            },
        )
        .unwrap();
        let ids: Vec<&str> = strong.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m1"]);
    }

    #[test]
    fn get_touches_last_accessed() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", "x", 0.5, None).unwrap();
        conn.execute(
            "UPDATE l4_salience SET last_accessed_at = '2020-01-01T00:00:00.000000Z'",
            [],
        )
        .unwrap();

        get_entries_sync(&conn, "c1", &SalienceQuery::default()).unwrap();

        let touched: String = conn
            .query_row(
                "SELECT last_accessed_at FROM l4_salience WHERE message_id = 'm1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_ne!(touched, "2020-01-01T00:00:00.000000Z");
    }
}

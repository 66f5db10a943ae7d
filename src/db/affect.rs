// src/db/affect.rs
// L2 affect index: categorical markers with intensity and multiplicative decay

use super::{new_id, now_ts, parse_ts};
use crate::types::{AffectCategory, AffectEntry};
use rusqlite::{Connection, Row};
use std::str::FromStr;
use tracing::debug;

/// Filters for reading affect entries
#[derive(Debug, Clone)]
pub struct AffectQuery {
    pub category: Option<AffectCategory>,
    pub min_intensity: f32,
    pub limit: usize,
    pub include_muted: bool,
}

impl Default for AffectQuery {
    fn default() -> Self {
        Self {
            category: None,
            min_intensity: 0.0,
            limit: 100,
            include_muted: false,
        }
    }
}

fn row_to_entry(row: &Row) -> rusqlite::Result<AffectEntry> {
    let category_raw: String = row.get("category")?;
    Ok(AffectEntry {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        message_id: row.get("message_id")?,
        category: AffectCategory::from_str(&category_raw).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown affect category {category_raw:?}").into(),
            )
        })?,
        intensity: row.get("intensity")?,
        reasoning: row.get("reasoning")?,
        decay_factor: row.get("decay_factor")?,
        is_muted: row.get::<_, i64>("is_muted")? != 0,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        last_accessed_at: parse_ts(&row.get::<_, String>("last_accessed_at")?),
    })
}

/// Insert a fresh affect marker (decay_factor 1.0, unmuted)
pub fn add_entry_sync(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    category: AffectCategory,
    intensity: f32,
    reasoning: Option<&str>,
) -> rusqlite::Result<AffectEntry> {
    let id = new_id();
    let now = now_ts();

    conn.execute(
        "INSERT INTO l2_affect
            (id, chat_id, message_id, category, intensity, reasoning,
             decay_factor, is_muted, created_at, last_accessed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1.0, 0, ?7, ?7)",
        rusqlite::params![
            id,
            chat_id,
            message_id,
            category.as_str(),
            intensity.clamp(0.0, 1.0),
            reasoning,
            now
        ],
    )?;

    debug!("Affect {} ({}) added for chat {}", id, category.as_str(), chat_id);

    let parsed = parse_ts(&now);
    Ok(AffectEntry {
        id,
        chat_id: chat_id.to_string(),
        message_id: message_id.to_string(),
        category,
        intensity: intensity.clamp(0.0, 1.0),
        reasoning: reasoning.map(|r| r.to_string()),
        decay_factor: 1.0,
        is_muted: false,
        created_at: parsed,
        last_accessed_at: parsed,
    })
}

/// Read entries ordered by effective intensity (intensity * decay_factor)
/// descending. Touches last_accessed_at for every returned row in a single
/// update.
pub fn get_entries_sync(
    conn: &Connection,
    chat_id: &str,
    query: &AffectQuery,
) -> rusqlite::Result<Vec<AffectEntry>> {
    let entries: Vec<AffectEntry> = {
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, message_id, category, intensity, reasoning,
                    decay_factor, is_muted, created_at, last_accessed_at
             FROM l2_affect
             WHERE chat_id = ?1
               AND (?2 IS NULL OR category = ?2)
               AND intensity * decay_factor >= ?3
               AND (?4 OR is_muted = 0)
             ORDER BY intensity * decay_factor DESC, rowid ASC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                chat_id,
                query.category.map(|c| c.as_str()),
                query.min_intensity,
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
            "UPDATE l2_affect SET last_accessed_at = ?1 WHERE id IN ({})",
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

/// Multiply every decay_factor of the chat by `rate`. Returns rows touched.
pub fn decay_sync(conn: &Connection, chat_id: &str, rate: f32) -> rusqlite::Result<usize> {
    let updated = conn.execute(
        "UPDATE l2_affect SET decay_factor = decay_factor * ?1 WHERE chat_id = ?2",
        rusqlite::params![rate, chat_id],
    )?;
    if updated > 0 {
        debug!("Decayed {} affect entries in chat {}", updated, chat_id);
    }
    Ok(updated)
}

/// Entry count for one chat (stats)
pub fn count_sync(conn: &Connection, chat_id: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM l2_affect WHERE chat_id = ?1",
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
    fn add_sets_decay_one_and_unmuted() {
        let conn = setup_test_connection();
        let entry = add_entry_sync(
            &conn,
            "c1",
            "m1",
            AffectCategory::Frustrated,
            0.8,
            Some("build broke twice"),
        )
        .unwrap();
        assert_eq!(entry.decay_factor, 1.0);
        assert!(!entry.is_muted);
        assert_eq!(entry.reasoning.as_deref(), Some("build broke twice"));
    }

    #[test]
    fn intensity_is_clamped() {
        let conn = setup_test_connection();
        let entry =
            add_entry_sync(&conn, "c1", "m1", AffectCategory::Urgent, 2.0, None).unwrap();
        assert_eq!(entry.intensity, 1.0);
    }

    #[test]
    fn get_orders_by_effective_intensity() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", AffectCategory::Curious, 0.5, None).unwrap();
        add_entry_sync(&conn, "c1", "m2", AffectCategory::Frustrated, 0.9, None).unwrap();
        // High intensity but heavily decayed
        add_entry_sync(&conn, "c1", "m3", AffectCategory::Urgent, 1.0, None).unwrap();
        conn.execute(
            "UPDATE l2_affect SET decay_factor = 0.1 WHERE message_id = 'm3'",
            [],
        )
        .unwrap();

        let entries = get_entries_sync(&conn, "c1", &AffectQuery::default()).unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1", "m3"]);
    }

    #[test]
    fn get_filters_category_min_intensity_and_muted() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", AffectCategory::Curious, 0.9, None).unwrap();
        add_entry_sync(&conn, "c1", "m2", AffectCategory::Confused, 0.4, None).unwrap();
        add_entry_sync(&conn, "c1", "m3", AffectCategory::Curious, 0.2, None).unwrap();
        conn.execute("UPDATE l2_affect SET is_muted = 1 WHERE message_id = 'm1'", [])
            .unwrap();

        let curious = get_entries_sync(
            &conn,
            "c1",
            &AffectQuery {
                category: Some(AffectCategory::Curious),
                ..Default::default()
            },
        )
        .unwrap();
        // m1 muted, m3 visible
        assert_eq!(curious.len(), 1);
        assert_eq!(curious[0].message_id, "m3");

        let strong = get_entries_sync(
            &conn,
            "c1",
            &AffectQuery {
                min_intensity: 0.3,
                include_muted: true,
                ..Default::default()
            },
        )
        .unwrap();
        let ids: Vec<&str> = strong.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn get_touches_last_accessed() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", AffectCategory::Satisfied, 0.6, None).unwrap();
        conn.execute(
            "UPDATE l2_affect SET last_accessed_at = '2020-01-01T00:00:00.000000Z'",
            [],
        )
        .unwrap();

        let entries = get_entries_sync(&conn, "c1", &AffectQuery::default()).unwrap();
        assert_eq!(entries.len(), 1);

        let touched: String = conn
            .query_row(
                "SELECT last_accessed_at FROM l2_affect WHERE message_id = 'm1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(touched.starts_with("202"));
        assert_ne!(touched, "2020-01-01T00:00:00.000000Z");
    }

    #[test]
    fn decay_strictly_shrinks_factors() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "m1", AffectCategory::Curious, 0.5, None).unwrap();
        add_entry_sync(&conn, "c1", "m2", AffectCategory::Urgent, 0.9, None).unwrap();
        add_entry_sync(&conn, "c2", "m3", AffectCategory::Urgent, 0.9, None).unwrap();

        let touched = decay_sync(&conn, "c1", 0.95).unwrap();
        assert_eq!(touched, 2);

        let factors: Vec<f32> = {
            let mut stmt = conn
                .prepare("SELECT decay_factor FROM l2_affect WHERE chat_id = 'c1'")
                .unwrap();
            let rows = stmt.query_map([], |r| r.get(0)).unwrap();
            rows.collect::<rusqlite::Result<_>>().unwrap()
        };
        assert!(factors.iter().all(|f| (*f - 0.95).abs() < 1e-6));

        // Other chat untouched
        let other: f32 = conn
            .query_row(
                "SELECT decay_factor FROM l2_affect WHERE chat_id = 'c2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(other, 1.0);
    }
}

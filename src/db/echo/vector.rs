// src/db/echo/vector.rs
// L3 dense index: one embedding row per (message, model), searched by
// brute-force cosine over the chat's candidates. Per-chat row counts are
// expected to stay small; the packed blob format is stable on disk.

use crate::db::{new_id, now_ts, parse_ts};
use crate::similarity::{content_hash, cosine, deserialize_embedding, serialize_embedding};
use crate::types::{VectorEntry, VectorHit};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

/// Upsert an embedding for a message. Keyed on (message_id, model); the
/// content hash travels with the row so unchanged content can skip
/// re-embedding upstream.
pub fn add_entry_sync(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    content: &str,
    embedding: &[f32],
    model: &str,
) -> rusqlite::Result<VectorEntry> {
    let hash = content_hash(content);
    let blob = serialize_embedding(embedding);
    let now = now_ts();

    conn.execute(
        "INSERT INTO l3_vectors
            (id, chat_id, message_id, content_hash, embedding, model, dimensions,
             boost_factor, is_muted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1.0, 0, ?8)
         ON CONFLICT(message_id, model) DO UPDATE SET
            content_hash = excluded.content_hash,
            embedding = excluded.embedding,
            dimensions = excluded.dimensions",
        rusqlite::params![
            new_id(),
            chat_id,
            message_id,
            hash,
            blob,
            model,
            embedding.len() as i64,
            now
        ],
    )?;

    // The conflict path keeps the original row id; read it back
    let (id, created_at): (String, String) = conn.query_row(
        "SELECT id, created_at FROM l3_vectors WHERE message_id = ?1 AND model = ?2",
        rusqlite::params![message_id, model],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    debug!("Vector {} stored for message {} ({})", id, message_id, model);

    Ok(VectorEntry {
        id,
        chat_id: chat_id.to_string(),
        message_id: message_id.to_string(),
        content_hash: hash,
        embedding: embedding.to_vec(),
        model: model.to_string(),
        dimensions: embedding.len(),
        boost_factor: 1.0,
        is_muted: false,
        created_at: parse_ts(&created_at),
    })
}

/// Look up the stored content hash for (message, model), if any
pub fn stored_hash_sync(
    conn: &Connection,
    message_id: &str,
    model: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT content_hash FROM l3_vectors WHERE message_id = ?1 AND model = ?2",
        rusqlite::params![message_id, model],
        |row| row.get(0),
    )
    .optional()
}

/// Brute-force cosine search over a chat's vectors.
///
/// Candidates whose dimensions don't match the query are skipped rather
/// than failing the whole search. Score is cosine * boost_factor; ties
/// break on message_id for deterministic ordering.
pub fn search_sync(
    conn: &Connection,
    chat_id: &str,
    query: &[f32],
    top_k: usize,
    include_muted: bool,
) -> rusqlite::Result<Vec<VectorHit>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, embedding, dimensions, boost_factor, model
         FROM l3_vectors
         WHERE chat_id = ?1 AND (?2 OR is_muted = 0)",
    )?;
    let rows = stmt.query_map(rusqlite::params![chat_id, include_muted], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, i64>(2)? as usize,
            row.get::<_, f32>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (message_id, blob, dimensions, boost, model) = row?;
        if dimensions != query.len() {
            continue;
        }
        let candidate = match deserialize_embedding(&blob) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping corrupt embedding for message {}: {}", message_id, e);
                continue;
            }
        };
        if candidate.len() != query.len() {
            continue;
        }
        let similarity = cosine(query, &candidate).unwrap_or(0.0);
        hits.push(VectorHit {
            message_id,
            score: similarity * boost,
            model,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
    hits.truncate(top_k);
    Ok(hits)
}

/// Vector row count for one chat (stats)
pub fn count_sync(conn: &Connection, chat_id: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM l3_vectors WHERE chat_id = ?1",
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
    fn add_round_trips_blob() {
        let conn = setup_test_connection();
        let entry =
            add_entry_sync(&conn, "c1", "m1", "hello", &[0.1, 0.2, 0.3], "test-model").unwrap();
        assert_eq!(entry.dimensions, 3);

        let blob: Vec<u8> = conn
            .query_row(
                "SELECT embedding FROM l3_vectors WHERE message_id = 'm1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(deserialize_embedding(&blob).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn upsert_keeps_one_row_per_message_model() {
        let conn = setup_test_connection();
        let first = add_entry_sync(&conn, "c1", "m1", "v1", &[1.0, 0.0], "m").unwrap();
        let second = add_entry_sync(&conn, "c1", "m1", "v2", &[0.0, 1.0], "m").unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(first.content_hash, second.content_hash);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM l3_vectors", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // Different model gets its own row
        add_entry_sync(&conn, "c1", "m1", "v2", &[0.0, 1.0], "other").unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM l3_vectors", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn search_orders_by_similarity() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "e1", "a", &[1.0, 0.0, 0.0], "m").unwrap();
        add_entry_sync(&conn, "c1", "e2", "b", &[0.0, 1.0, 0.0], "m").unwrap();
        add_entry_sync(&conn, "c1", "e3", "c", &[0.9, 0.1, 0.0], "m").unwrap();

        let hits = search_sync(&conn, "c1", &[1.0, 0.0, 0.0], 2, false).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.message_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn search_skips_mismatched_dimensions() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "ok", "a", &[1.0, 0.0], "m").unwrap();
        add_entry_sync(&conn, "c1", "wide", "b", &[1.0, 0.0, 0.0], "m").unwrap();

        let hits = search_sync(&conn, "c1", &[1.0, 0.0], 10, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, "ok");
    }

    #[test]
    fn search_applies_boost_and_mute() {
        let conn = setup_test_connection();
        add_entry_sync(&conn, "c1", "plain", "a", &[1.0, 0.0], "m").unwrap();
        add_entry_sync(&conn, "c1", "boosted", "b", &[0.9, 0.1], "m").unwrap();
        add_entry_sync(&conn, "c1", "muted", "c", &[1.0, 0.0], "m").unwrap();
        conn.execute(
            "UPDATE l3_vectors SET boost_factor = 2.0 WHERE message_id = 'boosted'",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE l3_vectors SET is_muted = 1 WHERE message_id = 'muted'",
            [],
        )
        .unwrap();

        let hits = search_sync(&conn, "c1", &[1.0, 0.0], 10, false).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.message_id.as_str()).collect();
        assert_eq!(ids, vec!["boosted", "plain"]);

        let with_muted = search_sync(&conn, "c1", &[1.0, 0.0], 10, true).unwrap();
        assert_eq!(with_muted.len(), 3);
    }

    #[test]
    fn stored_hash_reports_current_content() {
        let conn = setup_test_connection();
        assert!(stored_hash_sync(&conn, "m1", "m").unwrap().is_none());

        add_entry_sync(&conn, "c1", "m1", "hello", &[1.0], "m").unwrap();
        assert_eq!(
            stored_hash_sync(&conn, "m1", "m").unwrap(),
            Some(content_hash("hello"))
        );
    }
}

// src/db/echo/lexical.rs
// L3 lexical index: FTS5 full-text search with BM25 ranking.
//
// BM25 raw scores are negative with more-negative = better; ranking uses
// |bm25| * boost_factor. The metadata sibling table carries boost and mute
// flags the virtual table cannot hold.

use crate::types::LexicalHit;
use rusqlite::Connection;
use tracing::debug;

/// Insert (or replace) a message in the full-text index and upsert its
/// metadata sibling.
pub fn add_entry_sync(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    content: &str,
) -> rusqlite::Result<()> {
    // Replace any previous indexing of this message
    conn.execute(
        "DELETE FROM l3_lexical WHERE chat_id = ?1 AND message_id = ?2",
        rusqlite::params![chat_id, message_id],
    )?;
    conn.execute(
        "INSERT INTO l3_lexical (content, chat_id, message_id) VALUES (?1, ?2, ?3)",
        rusqlite::params![content, chat_id, message_id],
    )?;
    conn.execute(
        "INSERT INTO l3_lexical_meta (chat_id, message_id, boost_factor, is_muted)
         VALUES (?1, ?2, 1.0, 0)
         ON CONFLICT(chat_id, message_id) DO NOTHING",
        rusqlite::params![chat_id, message_id],
    )?;

    debug!("Lexical entry indexed for message {}", message_id);
    Ok(())
}

/// BM25-ranked search scoped to one chat. Best matches first; score is
/// |bm25| * boost_factor.
pub fn search_sync(
    conn: &Connection,
    chat_id: &str,
    query: &str,
    top_k: usize,
    include_muted: bool,
) -> rusqlite::Result<Vec<LexicalHit>> {
    let fts_query = build_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT l3_lexical.message_id, l3_lexical.content,
                bm25(l3_lexical) AS raw_score,
                m.boost_factor
         FROM l3_lexical
         JOIN l3_lexical_meta m
           ON m.chat_id = l3_lexical.chat_id AND m.message_id = l3_lexical.message_id
         WHERE l3_lexical MATCH ?1
           AND l3_lexical.chat_id = ?2
           AND (?3 OR m.is_muted = 0)
         ORDER BY bm25(l3_lexical) * m.boost_factor ASC
         LIMIT ?4",
    )?;
    let rows = stmt.query_map(
        rusqlite::params![fts_query, chat_id, include_muted, top_k as i64],
        |row| {
            let raw: f64 = row.get(2)?;
            let boost: f64 = row.get(3)?;
            Ok(LexicalHit {
                message_id: row.get(0)?,
                content: row.get(1)?,
                score: (raw.abs() * boost) as f32,
            })
        },
    )?;
    rows.collect()
}

/// Indexed row count for one chat (stats)
pub fn count_sync(conn: &Connection, chat_id: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM l3_lexical_meta WHERE chat_id = ?1",
        [chat_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Build an FTS5 query from user input: escape special characters, OR the
/// terms together, prefix-match the last one.
fn build_fts_query(query: &str) -> String {
    let terms: Vec<&str> = query.split_whitespace().filter(|t| !t.is_empty()).collect();
    if terms.is_empty() {
        return String::new();
    }

    let mut parts: Vec<String> = Vec::new();
    for (i, term) in terms.iter().enumerate() {
        let cleaned = escape_fts_term(term);
        if cleaned.is_empty() {
            continue;
        }
        if i == terms.len() - 1 {
            parts.push(format!("{cleaned}*"));
        } else {
            parts.push(cleaned);
        }
    }
    parts.join(" OR ")
}

/// Strip FTS5 special characters (" - * ( ) ^ .) from a term
fn escape_fts_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

// src/db/embedding_cache.rs
// Content-hash deduplicated embedding cache, read-through and idempotent

use super::{now_ts, parse_ts};
use crate::similarity::{deserialize_embedding, serialize_embedding};
use crate::types::EmbeddingCacheEntry;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

/// Look up a cached embedding by (content_hash, model), touching
/// last_accessed_at on a hit.
pub fn get_sync(
    conn: &Connection,
    content_hash: &str,
    model: &str,
) -> rusqlite::Result<Option<EmbeddingCacheEntry>> {
    let row = conn
        .query_row(
            "SELECT embedding, dimensions, created_at, last_accessed_at
             FROM embedding_cache
             WHERE content_hash = ?1 AND model = ?2",
            rusqlite::params![content_hash, model],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, i64>(1)? as usize,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((blob, dimensions, created_at, last_accessed_at)) = row else {
        return Ok(None);
    };

    let embedding = deserialize_embedding(&blob).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            e.to_string().into(),
        )
    })?;

    conn.execute(
        "UPDATE embedding_cache SET last_accessed_at = ?1
         WHERE content_hash = ?2 AND model = ?3",
        rusqlite::params![now_ts(), content_hash, model],
    )?;

    debug!("Embedding cache hit for {}", &content_hash[..8.min(content_hash.len())]);

    Ok(Some(EmbeddingCacheEntry {
        content_hash: content_hash.to_string(),
        embedding,
        model: model.to_string(),
        dimensions,
        created_at: parse_ts(&created_at),
        last_accessed_at: parse_ts(&last_accessed_at),
    }))
}

/// Store an embedding. INSERT OR REPLACE: colliding writes are idempotent.
pub fn put_sync(
    conn: &Connection,
    content_hash: &str,
    embedding: &[f32],
    model: &str,
) -> rusqlite::Result<()> {
    let now = now_ts();
    conn.execute(
        "INSERT OR REPLACE INTO embedding_cache
            (content_hash, model, embedding, dimensions, created_at, last_accessed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        rusqlite::params![
            content_hash,
            model,
            serialize_embedding(embedding),
            embedding.len() as i64,
            now
        ],
    )?;
    Ok(())
}

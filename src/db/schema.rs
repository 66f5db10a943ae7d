// src/db/schema.rs
// Versioned schema migrations for the memory store.
//
// Migrations run in ascending version order inside individual transactions
// and record themselves in _migrations. A failing migration aborts the whole
// batch and surfaces its version.

use crate::error::{MemoryError, Result};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::info;

/// One versioned schema change
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
}

/// All known migrations, ascending by version
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core-stores",
        up: CORE_STORES,
    },
    Migration {
        version: 2,
        name: "lexical-fts",
        up: LEXICAL_FTS,
    },
    Migration {
        version: 3,
        name: "access-indexes",
        up: ACCESS_INDEXES,
    },
];

/// Run all pending migrations.
///
/// Idempotent: already-applied versions are skipped. Each migration commits
/// atomically; on failure the batch stops and the failing version is
/// reported.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|e| MemoryError::storage("_migrations.create", e))?;

    let applied = applied_versions(conn)?;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        info!(
            "Applying migration {} ({})",
            migration.version, migration.name
        );

        let result = (|| -> anyhow::Result<()> {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration.up)?;
            tx.execute(
                "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.name,
                    chrono::Utc::now().to_rfc3339()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })();

        if let Err(source) = result {
            return Err(MemoryError::Migration {
                version: migration.version,
                source,
            });
        }
    }

    Ok(())
}

/// Versions already recorded in _migrations
pub fn applied_versions(conn: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = conn
        .prepare("SELECT version FROM _migrations")
        .map_err(|e| MemoryError::storage("_migrations.select", e))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .map_err(|e| MemoryError::storage("_migrations.select", e))?;

    let mut versions = HashSet::new();
    for row in rows {
        versions.insert(row.map_err(|e| MemoryError::storage("_migrations.select", e))?);
    }
    Ok(versions)
}

// =======================================
// v1: the five layer stores + cache + run bookkeeping + config
// =======================================
const CORE_STORES: &str = r#"
-- L1: sliding token-bounded recency buffer. Eviction is logical
-- (evicted_at tombstone); content stays readable for lexical lookups.
CREATE TABLE l1_river (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    content TEXT NOT NULL,
    token_count INTEGER NOT NULL CHECK (token_count >= 0),
    timestamp TEXT NOT NULL,
    evicted_at TEXT
);
CREATE INDEX idx_river_live ON l1_river(chat_id, timestamp) WHERE evicted_at IS NULL;
CREATE INDEX idx_river_message ON l1_river(message_id);

-- L2: categorical affect markers with intensity and multiplicative decay
CREATE TABLE l2_affect (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    category TEXT NOT NULL,
    intensity REAL NOT NULL,
    reasoning TEXT,
    decay_factor REAL NOT NULL DEFAULT 1.0,
    is_muted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL
);
CREATE INDEX idx_affect_chat ON l2_affect(chat_id);

-- L3 dense: one embedding per (message, model), little-endian f32 blob
CREATE TABLE l3_vectors (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding BLOB NOT NULL,
    model TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    boost_factor REAL NOT NULL DEFAULT 1.0,
    is_muted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(message_id, model)
);
CREATE INDEX idx_vectors_chat ON l3_vectors(chat_id);
CREATE INDEX idx_vectors_hash ON l3_vectors(content_hash);

-- L3 graph: entities are unique on (type, value, chat); chat_id NULL = global
CREATE TABLE l3_entities (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    value TEXT NOT NULL,
    canonical_form TEXT,
    chat_id TEXT,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);
CREATE INDEX idx_entities_lookup ON l3_entities(entity_type, value, chat_id);
CREATE INDEX idx_entities_value ON l3_entities(value);

CREATE TABLE l3_relations (
    id TEXT PRIMARY KEY,
    source_entity_id TEXT NOT NULL REFERENCES l3_entities(id) ON DELETE CASCADE,
    target_entity_id TEXT NOT NULL REFERENCES l3_entities(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    context_message_id TEXT,
    confidence REAL NOT NULL DEFAULT 1.0,
    is_muted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_relations_source ON l3_relations(source_entity_id);
CREATE INDEX idx_relations_target ON l3_relations(target_entity_id);

-- L4: one salience row per message; pinning forces score 1.0 / priority 100
CREATE TABLE l4_salience (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    message_id TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    salience_score REAL NOT NULL,
    prediction_error REAL,
    user_pinned INTEGER NOT NULL DEFAULT 0,
    retention_priority INTEGER NOT NULL,
    is_muted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL
);
CREATE INDEX idx_salience_chat ON l4_salience(chat_id);

-- L5: concept co-occurrence graph
CREATE TABLE l5_nodes (
    id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL,
    value TEXT NOT NULL,
    chat_id TEXT,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);
CREATE INDEX idx_nodes_lookup ON l5_nodes(node_type, value, chat_id);

CREATE TABLE l5_edges (
    id TEXT PRIMARY KEY,
    source_node_id TEXT NOT NULL REFERENCES l5_nodes(id) ON DELETE CASCADE,
    target_node_id TEXT NOT NULL REFERENCES l5_nodes(id) ON DELETE CASCADE,
    weight REAL NOT NULL,
    temporal_decay REAL NOT NULL DEFAULT 1.0,
    last_reinforced_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(source_node_id, target_node_id)
);
CREATE INDEX idx_edges_source ON l5_edges(source_node_id);
CREATE INDEX idx_edges_target ON l5_edges(target_node_id);

-- Content-hash deduplicated embedding cache (read-through)
CREATE TABLE embedding_cache (
    content_hash TEXT NOT NULL,
    model TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    PRIMARY KEY (content_hash, model)
);

-- Consolidation run bookkeeping
CREATE TABLE consolidation_runs (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    items_processed INTEGER NOT NULL DEFAULT 0,
    summaries_created INTEGER NOT NULL DEFAULT 0,
    conflicts_detected INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX idx_runs_chat ON consolidation_runs(chat_id, started_at);

-- Engine configuration
CREATE TABLE memory_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

// =======================================
// v2: full-text index for the echo layer's lexical encoding.
// BM25-ranked; the metadata sibling carries boost/mute flags the
// virtual table cannot hold.
// =======================================
const LEXICAL_FTS: &str = r#"
CREATE VIRTUAL TABLE l3_lexical USING fts5(
    content,
    chat_id UNINDEXED,
    message_id UNINDEXED,
    tokenize='porter unicode61 remove_diacritics 1'
);

CREATE TABLE l3_lexical_meta (
    chat_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    boost_factor REAL NOT NULL DEFAULT 1.0,
    is_muted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (chat_id, message_id)
);
"#;

// =======================================
// v3: ordering indexes for the hot read paths
// =======================================
const ACCESS_INDEXES: &str = r#"
CREATE INDEX idx_affect_rank ON l2_affect(chat_id, intensity);
CREATE INDEX idx_salience_rank ON l4_salience(chat_id, retention_priority DESC, salience_score DESC);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_apply_cleanly() {
        let conn = open();
        run_migrations(&conn).unwrap();

        let applied = applied_versions(&conn).unwrap();
        assert_eq!(applied.len(), MIGRATIONS.len());

        // Spot-check tables exist
        for table in [
            "l1_river",
            "l2_affect",
            "l3_vectors",
            "l3_entities",
            "l3_relations",
            "l4_salience",
            "l5_nodes",
            "l5_edges",
            "embedding_cache",
            "consolidation_runs",
            "memory_config",
            "l3_lexical_meta",
        ] {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            assert!(exists, "missing table {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = open();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn migrations_are_ordered_ascending() {
        let mut prev = 0;
        for m in MIGRATIONS {
            assert!(m.version > prev, "versions must ascend");
            prev = m.version;
        }
    }

    #[test]
    fn failing_migration_reports_version() {
        let conn = open();
        // Seed _migrations, then collide on an existing table to force a failure
        run_migrations(&conn).unwrap();
        conn.execute("DELETE FROM _migrations WHERE version = 1", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        match err {
            MemoryError::Migration { version, .. } => assert_eq!(version, 1),
            other => panic!("expected Migration error, got {other:?}"),
        }
    }

    #[test]
    fn fts_index_accepts_and_matches_content() {
        let conn = open();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO l3_lexical (content, chat_id, message_id) VALUES (?1, ?2, ?3)",
            rusqlite::params!["the transducer hums quietly", "c1", "m1"],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM l3_lexical WHERE l3_lexical MATCH 'transducer' AND chat_id = 'c1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }
}

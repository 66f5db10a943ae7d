// src/db/test_support.rs
// Shared test helpers for database tests

use super::pool::DatabasePool;
use super::schema::run_migrations;
use rusqlite::Connection;
use std::sync::Arc;

/// Install a test-writer subscriber once so RUST_LOG works under cargo test
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Create a sync in-memory connection with all migrations applied.
/// Use this for sync tests that don't need async pool semantics.
pub fn setup_test_connection() -> Connection {
    init_test_tracing();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    run_migrations(&conn).unwrap();
    conn
}

/// Create a test pool (shared in-memory DB)
pub async fn setup_test_pool() -> Arc<DatabasePool> {
    init_test_tracing();
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool"),
    )
}

/// Seed a river entry with a fixed timestamp (RFC 3339). Returns the row id.
pub fn seed_river_entry(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    content: &str,
    token_count: u32,
    timestamp: &str,
) -> String {
    let id = super::new_id();
    conn.execute(
        "INSERT INTO l1_river (id, chat_id, message_id, content, token_count, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, chat_id, message_id, content, token_count, timestamp],
    )
    .unwrap();
    id
}

/// Seed a lexical row plus its metadata sibling
pub fn seed_lexical(conn: &Connection, chat_id: &str, message_id: &str, content: &str) {
    super::echo::lexical::add_entry_sync(conn, chat_id, message_id, content).unwrap();
}

/// Seed a vector row from a raw f32 slice
pub fn seed_vector(
    conn: &Connection,
    chat_id: &str,
    message_id: &str,
    content: &str,
    embedding: &[f32],
    model: &str,
) -> String {
    super::echo::vector::add_entry_sync(conn, chat_id, message_id, content, embedding, model)
        .unwrap()
        .id
}

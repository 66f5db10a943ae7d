// src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// All database access goes through `pool.interact()`, which runs the closure
// on a blocking thread so it never stalls the async runtime. In-memory
// databases use a shared-cache URI so every pooled connection sees the same
// state (critical for tests).

use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Default busy timeout applied to every connection, in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// SQLITE_BUSY occurs with file-based databases under write contention.
/// SQLITE_LOCKED occurs with shared-cache in-memory databases when another
/// connection holds a write lock on the same table.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Check if an anyhow::Error chain contains a SQLite contention error
fn is_sqlite_contention(err: &anyhow::Error) -> bool {
    err.downcast_ref::<rusqlite::Error>()
        .map(is_rusqlite_contention)
        .unwrap_or(false)
}

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s)
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Database pool wrapper with per-connection pragma setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

/// Whether to use a file path or a shared in-memory URI
enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path, creating it if missing.
    /// Runs pending migrations before returning.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf()), DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Open a pooled database with a caller-chosen busy timeout.
    pub async fn open_with_busy_timeout(path: &Path, busy_timeout_ms: u32) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf()), busy_timeout_ms).await
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared-cache URI so all connections access the same in-memory
    /// database; without it each pooled connection would get its own.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    async fn open_internal(storage: DbStorage, busy_timeout_ms: u32) -> Result<Self> {
        let (conn_str, path, memory_uri) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = p.to_string_lossy().to_string();
                (s, Some(p), None)
            }
            DbStorage::InMemory => {
                let uri = format!(
                    "file:memdb_{}?mode=memory&cache=shared",
                    uuid::Uuid::new_v4().simple()
                );
                (uri.clone(), None, Some(uri))
            }
        };

        let is_memory = memory_uri.is_some();
        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(make_post_create_hook(busy_timeout_ms, is_memory))
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        db_pool
            .interact(|conn| super::schema::run_migrations(conn).map_err(Into::into))
            .await?;

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    ///
    /// This is the primary API for database access. The closure runs on a
    /// blocking thread pool, so it won't block the async runtime.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors but not
    /// propagating. Use for best-effort operations.
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure with retry on SQLite contention errors.
    ///
    /// Uses exponential backoff (100ms, 500ms, 2000ms) for up to 3 retries.
    /// Use this for writes that must not be lost. The closure must be
    /// `Clone` to support retries.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            let f_clone = f.clone();
            match self.interact(f_clone).await {
                Ok(result) => return Ok(result),
                Err(e) if is_sqlite_contention(&e) => {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        // Final attempt (no retry after this)
        self.interact(f).await
    }

    /// Get pool status for monitoring
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

/// Pool status for monitoring
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Create a post_create hook applying connection pragmas.
///
/// WAL mode is skipped for in-memory databases (not applicable).
fn make_post_create_hook(busy_timeout_ms: u32, is_memory: bool) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        Box::pin(async move {
            conn.interact(move |conn| setup_connection(conn, busy_timeout_ms, is_memory))
                .await
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
                })?
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(
                        format!("connection setup failed: {e}").into(),
                    )
                })
        })
    })
}

/// Configure a connection after it's created. Called from the post_create
/// hook: WAL journaling, foreign keys, busy timeout, NORMAL fsync.
fn setup_connection(
    conn: &Connection,
    busy_timeout_ms: u32,
    is_memory: bool,
) -> rusqlite::Result<()> {
    let journal = if is_memory {
        String::new()
    } else {
        "PRAGMA journal_mode=WAL; ".to_string()
    };
    conn.execute_batch(&format!(
        "{journal}PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout={busy_timeout_ms}; \
         PRAGMA synchronous=NORMAL;"
    ))?;
    Ok(())
}

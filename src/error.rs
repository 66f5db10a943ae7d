// src/error.rs
// Standardized error types for the memory engine

use thiserror::Error;

/// Main error type for the reverie library
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage failure in {statement}: {source}")]
    Storage {
        statement: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("migration {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("classification failed: {0}")]
    ClassificationFailed(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using MemoryError
pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Wrap a rusqlite error with the name of the statement that triggered it
    pub fn storage(statement: &'static str, source: rusqlite::Error) -> Self {
        MemoryError::Storage { statement, source }
    }
}

impl From<String> for MemoryError {
    fn from(s: String) -> Self {
        MemoryError::InvalidInput(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_carries_statement_name() {
        let err = MemoryError::storage("l1_river.insert", rusqlite::Error::InvalidQuery);
        let msg = err.to_string();
        assert!(msg.contains("l1_river.insert"));
    }

    #[test]
    fn migration_error_carries_version() {
        let err = MemoryError::Migration {
            version: 3,
            source: anyhow::anyhow!("syntax error"),
        };
        assert!(err.to_string().contains('3'));
    }
}

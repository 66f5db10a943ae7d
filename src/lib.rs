// src/lib.rs
// Reverie - multi-modal conversation memory engine

#![allow(clippy::collapsible_if)]
#![allow(clippy::too_many_arguments)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod config;
pub mod consolidation;
pub mod db;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod recall;
pub mod similarity;
pub mod types;


pub use config::MemoryConfig;
pub use db::DatabasePool;
pub use engine::{MemoryEngine, ProviderSet};
pub use error::{MemoryError, Result};
pub use pipeline::{IncomingMessage, WriteOptions, WriteResult};
pub use recall::{MemoryQuery, MemoryResult};

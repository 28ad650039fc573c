//! TestGrid Common Library
//!
//! Shared types, error taxonomy, and persistence for the TestGrid platform.

pub mod config;
pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use db::ExecutionStore;
pub use error::{Error, Result};
pub use types::*;

/// TestGrid version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".testgrid")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("executions.db")
}

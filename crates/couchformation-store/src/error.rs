//! Document store error types

use std::path::PathBuf;
use thiserror::Error;

/// Document store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store location is not accessible: {path}: {message}")]
    Inaccessible { path: PathBuf, message: String },

    #[error("Attribute '{key}' in document '{document}' is not a list")]
    NotAList { document: String, key: String },

    #[error("List entries must have at least one field")]
    EmptyEntry,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

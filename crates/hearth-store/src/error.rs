use hearth_shared::types::Cid;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Migration error: {0}")]
    Migration(String),

    /// A persisted JSON payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Block {0} not found")]
    BlockNotFound(Cid),

    #[error("Block too large: {size} bytes (max {max})")]
    BlockTooLarge { size: usize, max: usize },

    #[error("Block store unavailable: {0}")]
    BlockUnavailable(String),

    #[error("Path traversal detected")]
    PathTraversal,

    /// The store has been shut down.
    #[error("Store is closed")]
    Closed,

    #[error("Certificate error: {0}")]
    Certificate(#[from] hearth_shared::error::CertificateError),

    #[error("Lock poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

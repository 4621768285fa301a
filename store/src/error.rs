//! Storage error types

use thiserror::Error;

/// Errors raised by the storage facade (ItemStore, VectorStore, CacheStore).
///
/// Disposition of each variant is decided by the caller per spec §7: a
/// `Conflict` on `ItemStore::insert` is caught and treated as "already
/// exists" (idempotence), everything else from `ItemStore` aborts the
/// Persister batch, `VectorStore` errors mark the item `vector_pending`,
/// and `CacheStore` errors are logged and never fatal.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

//! Storage backend abstraction for Pagedrop.
//!
//! This crate defines the [`StorageBackend`] trait, a key-value interface
//! that knows nothing about pages or access keys. Record layout, locking and
//! expiry live in `pagedrop-core`; this layer only guarantees that a single
//! [`apply`](StorageBackend::apply) batch lands all-or-nothing.
//!
//! Three implementations are provided:
//!
//! - [`RocksDbBackend`]: production default, backed by `RocksDB` (feature `rocksdb-backend`)
//! - [`PostgresBackend`]: shared database, backed by sqlx (feature `postgres-backend`)
//! - [`MemoryBackend`]: in-memory, for development and tests

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite `key`.
    Put { key: String, value: Vec<u8> },
    /// Remove `key` (no-op if absent).
    Delete { key: String },
}

impl WriteOp {
    /// Build a [`WriteOp::Put`].
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Build a [`WriteOp::Delete`].
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `pages/3f9c01ab`,
/// `owners/<key_id>/<page_id>`). Values are opaque byte arrays.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting a non-existent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Apply a batch of writes atomically.
    ///
    /// Either every operation becomes visible or none does. Readers never
    /// observe a partially applied batch. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the batch cannot be committed.
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

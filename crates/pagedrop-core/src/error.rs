//! Error types for `pagedrop-core`.
//!
//! Each subsystem has its own enum. Variants carry the identifiers involved
//! (key id, page id, limits) but never a secret or its digest.

use pagedrop_storage::StorageError;

/// A stored record that could not be decoded or encoded.
#[derive(Debug, thiserror::Error)]
#[error("corrupt record at '{key}': {reason}")]
pub struct CorruptRecord {
    pub key: String,
    pub reason: String,
}

/// Errors from validating a presented access key.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No key matches the presented secret.
    #[error("invalid access key")]
    InvalidKey,

    /// The key exists but has been revoked.
    #[error("access key has been revoked")]
    Inactive,

    /// The key exists but is past its expiry.
    #[error("access key expired at {expired_at}")]
    Expired { expired_at: String },

    /// A key record could not be decoded.
    #[error("auth record error: {0}")]
    Corrupt(#[from] CorruptRecord),

    /// The storage backend failed.
    #[error("auth storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from key management operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The request failed a field check.
    #[error("{reason}")]
    Validation { reason: String },

    /// No key with this id exists.
    #[error("access key not found: {key_id}")]
    NotFound { key_id: String },

    /// The caller may not perform this operation.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// An admin key already exists.
    #[error("admin key is already initialized")]
    AlreadyInitialized,

    /// No admin key has been set yet.
    #[error("admin key is not initialized")]
    NotInitialized,

    /// A fresh key id kept colliding with existing ones.
    #[error("could not allocate a unique key id after {attempts} attempts")]
    IdExhausted { attempts: u32 },

    /// A key record could not be decoded.
    #[error("key record error: {0}")]
    Corrupt(#[from] CorruptRecord),

    /// The storage backend failed.
    #[error("key storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from page operations.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    /// The request failed a field check.
    #[error("{reason}")]
    Validation { reason: String },

    /// The HTML content exceeds the configured ceiling.
    #[error("html content is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The owning key already holds its maximum number of active pages.
    #[error("page quota exceeded: key may hold at most {max_pages} active pages")]
    QuotaExceeded { max_pages: u32 },

    /// The page does not exist, was deleted, or has expired.
    #[error("page not found: {page_id}")]
    NotFound { page_id: String },

    /// The caller may not perform this operation.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// A fresh page id kept colliding with existing ones.
    #[error("could not allocate a unique page id after {attempts} attempts")]
    IdExhausted { attempts: u32 },

    /// A page record could not be decoded.
    #[error("page record error: {0}")]
    Corrupt(#[from] CorruptRecord),

    /// The storage backend failed.
    #[error("page storage error: {0}")]
    Storage(#[from] StorageError),
}

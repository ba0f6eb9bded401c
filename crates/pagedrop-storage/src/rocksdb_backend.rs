//! `RocksDB` storage backend, the production default.
//!
//! `RocksDB` is a synchronous C++ library, so every call runs on the blocking
//! pool via [`tokio::task::spawn_blocking`]. Batches map onto a native
//! `WriteBatch`, which `RocksDB` commits atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};

use crate::{StorageBackend, StorageError, WriteOp};

type Db = DBWithThreadMode<MultiThreaded>;

/// A storage backend backed by `RocksDB`.
///
/// Cloning is cheap: clones share one database handle.
///
/// # Examples
///
/// ```no_run
/// # use pagedrop_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/pagedrop/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open a `RocksDB` database at the given path, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` fails to open or create the
    /// database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Run `op` against the database on the blocking pool.
    ///
    /// `on_error` turns a failure reason into the caller's error variant, so a
    /// panicked task reports the same key or prefix as a `RocksDB` error does.
    async fn blocking<T, F, E>(&self, op: F, on_error: E) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, rocksdb::Error> + Send + 'static,
        E: Fn(String) -> StorageError + Send + Sync + 'static,
    {
        let db = Arc::clone(&self.db);
        let on_error = Arc::new(on_error);
        let inner = Arc::clone(&on_error);
        tokio::task::spawn_blocking(move || op(db.as_ref()).map_err(|e| inner(e.to_string())))
            .await
            .map_err(|e| on_error(format!("blocking task panicked: {e}")))?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let target = key.to_owned();
        let key = key.to_owned();
        self.blocking(
            move |db| db.get(target.as_bytes()),
            move |reason| StorageError::Read {
                key: key.clone(),
                reason,
            },
        )
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let target = key.to_owned();
        let value = value.to_vec();
        let key = key.to_owned();
        self.blocking(
            move |db| db.put(target.as_bytes(), value),
            move |reason| StorageError::Write {
                key: key.clone(),
                reason,
            },
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let target = key.to_owned();
        let key = key.to_owned();
        self.blocking(
            move |db| db.delete(target.as_bytes()),
            move |reason| StorageError::Delete {
                key: key.clone(),
                reason,
            },
        )
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let scan = prefix.to_owned();
        let prefix = prefix.to_owned();
        let raw = self
            .blocking(
                move |db| {
                    let mut found = Vec::new();
                    let iter = db.iterator(IteratorMode::From(scan.as_bytes(), Direction::Forward));
                    for item in iter {
                        let (key, _) = item?;
                        if !key.starts_with(scan.as_bytes()) {
                            break;
                        }
                        found.push(key.into_vec());
                    }
                    Ok(found)
                },
                {
                    let prefix = prefix.clone();
                    move |reason| StorageError::List {
                        prefix: prefix.clone(),
                        reason,
                    }
                },
            )
            .await?;

        // Keys are written by pagedrop-core and always UTF-8; anything else
        // was put there by another tool.
        raw.into_iter()
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|e| StorageError::InvalidKey {
                    reason: format!("under prefix '{prefix}': {e}"),
                })
            })
            .collect()
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        // The blocking task runs to completion even if the caller is dropped,
        // so a cancelled request cannot leave half a batch behind.
        self.blocking(
            move |db| {
                let mut batch = WriteBatch::default();
                for op in &ops {
                    match op {
                        WriteOp::Put { key, value } => batch.put(key.as_bytes(), value),
                        WriteOp::Delete { key } => batch.delete(key.as_bytes()),
                    }
                }
                db.write(batch)
            },
            move |reason| StorageError::Transaction { ops: count, reason },
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = RocksDbBackend::open(dir.path()).unwrap();
            backend
                .apply(vec![
                    WriteOp::put("pages/p1", b"{\"title\":\"a\"}".to_vec()),
                    WriteOp::put("owners/k1/p1", Vec::new()),
                ])
                .await
                .unwrap();
        }

        let backend = RocksDbBackend::open(dir.path()).unwrap();
        assert!(backend.exists("pages/p1").await.unwrap());
        assert_eq!(
            backend.list("owners/k1/").await.unwrap(),
            vec!["owners/k1/p1"]
        );
    }

    #[tokio::test]
    async fn list_stops_at_prefix_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksDbBackend::open(dir.path()).unwrap();
        backend.put("keys/a", b"1").await.unwrap();
        backend.put("keys/b", b"2").await.unwrap();
        backend.put("pages/a", b"3").await.unwrap();

        assert_eq!(backend.list("keys/").await.unwrap(), vec!["keys/a", "keys/b"]);
    }

    #[tokio::test]
    async fn batch_delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksDbBackend::open(dir.path()).unwrap();
        backend.put("owners/k1/p1", b"").await.unwrap();

        backend
            .apply(vec![WriteOp::delete("owners/k1/p1")])
            .await
            .unwrap();

        assert!(!backend.exists("owners/k1/p1").await.unwrap());
    }

    #[tokio::test]
    async fn non_utf8_key_reports_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksDbBackend::open(dir.path()).unwrap();
        backend.db.put(b"keys/\xff", b"x").unwrap();

        let err = backend.list("keys/").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
        assert!(err.to_string().contains("keys/"), "{err}");
    }
}

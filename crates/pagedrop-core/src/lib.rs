//! Core library for Pagedrop.
//!
//! Holds the record types and the three services the gateway drives: the
//! [`KeyManager`](keys::KeyManager) (access keys, permissions, quotas), the
//! [`PageStore`](pages::PageStore) (page persistence, ids, expiry) and the
//! [`StatsAggregator`](stats::StatsAggregator) (usage counters). This crate
//! depends on `pagedrop-storage` for the backend trait and knows nothing
//! about HTTP.

pub mod clock;
pub mod error;
pub mod keys;
pub mod locks;
pub mod pages;
pub mod stats;

use std::sync::Arc;

use pagedrop_storage::{StorageBackend, StorageError, WriteOp};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::Clock;
use crate::error::CorruptRecord;
use crate::keys::KeyManager;
use crate::locks::{LockTable, RecordGuard};
use crate::pages::{PageLimits, PageStore};
use crate::stats::StatsAggregator;

/// The wired-up set of services sharing one backend, clock and lock table.
pub struct Services {
    pub keys: KeyManager,
    pub pages: PageStore,
    pub stats: Arc<StatsAggregator>,
}

impl Services {
    /// Build the services, rebuilding the usage counters from storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the initial scan fails.
    pub async fn open(
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        limits: PageLimits,
    ) -> Result<Self, StorageError> {
        let stats = Arc::new(StatsAggregator::rebuild(storage.as_ref(), clock.now()).await?);
        let locks = Arc::new(LockTable::new());

        let keys = KeyManager::new(
            Arc::clone(&storage),
            Arc::clone(&clock),
            Arc::clone(&locks),
            Arc::clone(&stats),
        );
        let pages = PageStore::new(storage, clock, locks, Arc::clone(&stats), limits);

        Ok(Self { keys, pages, stats })
    }
}

/// Commit `ops`, run `after` on success, then release `guard`.
///
/// All three happen on a spawned task, so a caller dropped mid-write can
/// neither lose the counter update for a committed batch nor let another
/// writer in before the batch lands.
pub(crate) async fn commit<F>(
    storage: &Arc<dyn StorageBackend>,
    ops: Vec<WriteOp>,
    guard: RecordGuard,
    after: F,
) -> Result<(), StorageError>
where
    F: FnOnce() + Send + 'static,
{
    let storage = Arc::clone(storage);
    let count = ops.len();
    tokio::spawn(async move {
        let _guard = guard;
        storage.apply(ops).await?;
        after();
        Ok::<(), StorageError>(())
    })
    .await
    .map_err(|e| StorageError::Transaction {
        ops: count,
        reason: format!("commit task failed: {e}"),
    })?
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, CorruptRecord> {
    serde_json::from_slice(bytes).map_err(|e| CorruptRecord {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}

pub(crate) fn encode<T: Serialize>(key: &str, record: &T) -> Result<Vec<u8>, CorruptRecord> {
    serde_json::to_vec(record).map_err(|e| CorruptRecord {
        key: key.to_owned(),
        reason: format!("encode failed: {e}"),
    })
}

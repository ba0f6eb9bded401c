//! Per-record lock table.
//!
//! Read-modify-write sequences on one record (an access counter bump, a
//! quota check followed by a create) must not interleave. Each storage key
//! gets its own async mutex on demand; the entry is dropped again once no
//! task holds or waits for it, so the table only ever contains hot records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// One record's mutex plus the number of guards (held or still waiting)
/// that refer to it.
#[derive(Debug, Default)]
struct Slot {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

/// A map from storage key to async mutex.
#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Holds the lock on one record until dropped.
///
/// The guard exists from the moment [`LockTable::lock`] registers interest,
/// so a waiter that is cancelled before acquiring still releases its slot.
/// It owns a handle to its table and can be moved into a spawned task.
#[derive(Debug)]
pub struct RecordGuard {
    table: Arc<LockTable>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(self: &Arc<Self>, key: &str) -> RecordGuard {
        let mutex = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key.to_owned()).or_default();
            slot.users += 1;
            Arc::clone(&slot.mutex)
        };
        let mut record = RecordGuard {
            table: Arc::clone(self),
            key: key.to_owned(),
            guard: None,
        };
        record.guard = Some(mutex.lock_owned().await);
        record
    }

    /// Number of records currently locked or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self
            .table
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

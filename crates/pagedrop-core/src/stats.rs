//! Usage counters.
//!
//! Three running totals (pages created, keys created, public page fetches)
//! and two gauges (live pages, active shared keys). The services bump them
//! only after the storage write they describe has succeeded. Nothing here is
//! persisted: on startup [`StatsAggregator::rebuild`] recomputes every value
//! from the records themselves, which is possible because tombstoned pages
//! keep their access records.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use pagedrop_storage::{StorageBackend, StorageError};
use serde::Serialize;
use tracing::{info, warn};

use crate::decode;
use crate::keys::{ADMIN_KEY_ID, KEY_PREFIX, KeyRecord};
use crate::pages::{ACCESS_PREFIX, PAGE_PREFIX, PageAccess, PageRecord};

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Live pages.
    pub pages_count: u64,
    /// Active (unrevoked) shared keys.
    pub keys_count: u64,
    /// Public page fetches, all time.
    pub total_access: u64,
    pub pages_created: u64,
    pub keys_created: u64,
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    pages_created: AtomicU64,
    keys_created: AtomicU64,
    total_access: AtomicU64,
    live_pages: AtomicU64,
    active_keys: AtomicU64,
}

fn decrement(gauge: &AtomicU64) {
    // Saturating: a gauge never wraps below zero.
    let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(1))
    });
}

impl StatsAggregator {
    pub fn record_page_created(&self) {
        self.pages_created.fetch_add(1, Ordering::Relaxed);
        self.live_pages.fetch_add(1, Ordering::Relaxed);
    }

    /// A page was deleted or expired.
    pub fn record_page_removed(&self) {
        decrement(&self.live_pages);
    }

    pub fn record_key_created(&self) {
        self.keys_created.fetch_add(1, Ordering::Relaxed);
        self.active_keys.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_revoked(&self) {
        decrement(&self.active_keys);
    }

    pub fn record_access(&self) {
        self.total_access.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pages_count: self.live_pages.load(Ordering::Relaxed),
            keys_count: self.active_keys.load(Ordering::Relaxed),
            total_access: self.total_access.load(Ordering::Relaxed),
            pages_created: self.pages_created.load(Ordering::Relaxed),
            keys_created: self.keys_created.load(Ordering::Relaxed),
        }
    }

    /// Recompute every counter from stored records.
    ///
    /// Pages already past expiry but not yet swept are not counted as live.
    /// Records that fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if listing or reading fails.
    pub async fn rebuild(
        storage: &dyn StorageBackend,
        now: DateTime<Utc>,
    ) -> Result<Self, StorageError> {
        let stats = Self::default();

        for key in storage.list(PAGE_PREFIX).await? {
            let Some(bytes) = storage.get(&key).await? else {
                continue;
            };
            let page: PageRecord = match decode(&key, &bytes) {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "skipping page record during stats rebuild");
                    continue;
                }
            };
            stats.pages_created.fetch_add(1, Ordering::Relaxed);
            if page.is_visible_at(now) {
                stats.live_pages.fetch_add(1, Ordering::Relaxed);
            }
        }

        for key in storage.list(ACCESS_PREFIX).await? {
            let Some(bytes) = storage.get(&key).await? else {
                continue;
            };
            match decode::<PageAccess>(&key, &bytes) {
                Ok(access) => {
                    stats
                        .total_access
                        .fetch_add(access.access_count, Ordering::Relaxed);
                }
                Err(e) => warn!(error = %e, "skipping access record during stats rebuild"),
            }
        }

        for key in storage.list(KEY_PREFIX).await? {
            if key[KEY_PREFIX.len()..] == *ADMIN_KEY_ID {
                continue;
            }
            let Some(bytes) = storage.get(&key).await? else {
                continue;
            };
            let record: KeyRecord = match decode(&key, &bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "skipping key record during stats rebuild");
                    continue;
                }
            };
            stats.keys_created.fetch_add(1, Ordering::Relaxed);
            if record.is_active {
                stats.active_keys.fetch_add(1, Ordering::Relaxed);
            }
        }

        let snap = stats.snapshot();
        info!(
            pages = snap.pages_count,
            keys = snap.keys_count,
            total_access = snap.total_access,
            "usage counters rebuilt"
        );
        Ok(stats)
    }
}

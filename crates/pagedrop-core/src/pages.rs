//! Page store for Pagedrop.
//!
//! Pages are persisted as one JSON record under `pages/<page_id>` plus an
//! owner index entry under `owners/<key_id>/<page_id>` whose value is the
//! page's expiry (epoch seconds, empty for permanent pages). Both are written
//! in a single atomic batch.
//!
//! Visit counts live apart from the page, in a small `access/<page_id>`
//! record, so counting a fetch never rewrites the page body.
//!
//! The owner index only ever holds live pages. Quota checks count its
//! unexpired entries, and the expiry sweep walks it instead of loading every
//! page body.
//!
//! Deleting or expiring a page tombstones it: the content is dropped, the
//! index entry removed, and the metadata record kept with `is_active =
//! false` so the id is never handed out again. The access record stays too.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pagedrop_storage::{StorageBackend, WriteOp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{CorruptRecord, PageError};
use crate::keys::{KeyContext, Permission};
use crate::locks::{LockTable, RecordGuard};
use crate::stats::StatsAggregator;
use crate::{commit, decode, encode};

/// Storage prefix for page records.
pub const PAGE_PREFIX: &str = "pages/";

/// Storage prefix for the per-key owner index.
pub const OWNER_PREFIX: &str = "owners/";

/// Storage prefix for per-page visit counters.
pub const ACCESS_PREFIX: &str = "access/";

/// Lower bound for the configurable HTML ceiling, in KiB.
pub const MIN_HTML_KB: u32 = 10;

/// Upper bound for the configurable HTML ceiling, in KiB.
pub const MAX_HTML_KB: u32 = 2000;

/// HTML ceiling used when none is configured, in KiB.
pub const DEFAULT_HTML_KB: u32 = 500;

/// Longest lifetime a page may request.
pub const MAX_PAGE_EXPIRE_DAYS: u32 = 365;

/// Default and maximum page count returned by [`PageStore::list_pages`].
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 1000;
const PAGE_ID_LEN: usize = 16;
const ID_ATTEMPTS: u32 = 5;

/// Size limits applied to incoming pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    max_html_bytes: usize,
}

impl PageLimits {
    /// Limits with an HTML ceiling of `kb` KiB, clamped to 10..=2000.
    #[must_use]
    pub fn from_kb(kb: u32) -> Self {
        let kb = kb.clamp(MIN_HTML_KB, MAX_HTML_KB);
        Self {
            max_html_bytes: kb as usize * 1024,
        }
    }

    #[must_use]
    pub fn max_html_bytes(&self) -> usize {
        self.max_html_bytes
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self::from_kb(DEFAULT_HTML_KB)
    }
}

/// A stored page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_id: String,
    pub title: String,
    pub description: String,
    /// Empty once the page is tombstoned.
    pub html_content: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub is_active: bool,
}

/// Visit counter for one page, stored under `access/<page_id>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAccess {
    pub access_count: u64,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl PageRecord {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }

    /// Active and not past expiry.
    #[must_use]
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired_at(now)
    }

    /// Metadata view, with counters taken from `access`.
    #[must_use]
    pub fn info(&self, access: PageAccess) -> PageInfo {
        PageInfo {
            page_id: self.page_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            access_count: access.access_count,
            last_accessed: access.last_accessed,
            created_by: self.created_by.clone(),
            size_bytes: self.html_content.len(),
        }
    }

    fn tombstone(&mut self) {
        self.is_active = false;
        self.html_content = String::new();
    }
}

/// Page metadata without the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub page_id: String,
    pub title: String,
    pub description: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_by: String,
    pub size_bytes: usize,
}

/// A deployment request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePageRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub html_content: String,
    /// `0` (the default) keeps the page forever.
    #[serde(default)]
    pub expires_in_days: u32,
}

/// Whether `id` has the shape of a generated page id.
#[must_use]
pub fn is_valid_page_id(id: &str) -> bool {
    id.len() == PAGE_ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn page_key(page_id: &str) -> String {
    format!("{PAGE_PREFIX}{page_id}")
}

fn owner_dir(key_id: &str) -> String {
    format!("{OWNER_PREFIX}{key_id}/")
}

fn owner_key(key_id: &str, page_id: &str) -> String {
    format!("{OWNER_PREFIX}{key_id}/{page_id}")
}

fn access_key(page_id: &str) -> String {
    format!("{ACCESS_PREFIX}{page_id}")
}

/// 64 random bits as 16 hex characters.
///
/// Byte 6 carries the v4 version nibble and byte 8 the variant bits, so
/// both are skipped.
fn generate_page_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let b = uuid.as_bytes();
    hex::encode([b[0], b[1], b[2], b[3], b[4], b[5], b[7], b[9]])
}

/// Owner index values hold the expiry as epoch seconds, or nothing.
fn encode_expiry(expires_at: Option<DateTime<Utc>>) -> Vec<u8> {
    expires_at
        .map(|t| t.timestamp().to_string().into_bytes())
        .unwrap_or_default()
}

fn index_entry_live(key: &str, value: &[u8], now: DateTime<Utc>) -> Result<bool, CorruptRecord> {
    if value.is_empty() {
        return Ok(true);
    }
    let secs = std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CorruptRecord {
            key: key.to_owned(),
            reason: "owner index value is not an epoch timestamp".to_owned(),
        })?;
    Ok(now.timestamp() < secs)
}

fn check_text(field: &str, value: &str, max_chars: usize) -> Result<String, PageError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(PageError::Validation {
            reason: format!("{field} must not be empty"),
        });
    }
    if len > max_chars {
        return Err(PageError::Validation {
            reason: format!("{field} must be at most {max_chars} characters"),
        });
    }
    Ok(trimmed.to_owned())
}

/// Persists pages, enforces quotas and expiry.
pub struct PageStore {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    locks: Arc<LockTable>,
    stats: Arc<StatsAggregator>,
    limits: PageLimits,
}

impl PageStore {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        locks: Arc<LockTable>,
        stats: Arc<StatsAggregator>,
        limits: PageLimits,
    ) -> Self {
        Self {
            storage,
            clock,
            locks,
            stats,
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    async fn load(&self, page_id: &str) -> Result<Option<PageRecord>, PageError> {
        let key = page_key(page_id);
        match self.storage.get(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_access(&self, page_id: &str) -> Result<PageAccess, PageError> {
        let key = access_key(page_id);
        match self.storage.get(&key).await? {
            Some(bytes) => Ok(decode(&key, &bytes)?),
            None => Ok(PageAccess::default()),
        }
    }

    /// Load a page that is active and unexpired, or fail with `NotFound`.
    async fn load_visible(&self, page_id: &str) -> Result<PageRecord, PageError> {
        let not_found = || PageError::NotFound {
            page_id: page_id.to_owned(),
        };
        if !is_valid_page_id(page_id) {
            return Err(not_found());
        }
        let record = self.load(page_id).await?.ok_or_else(not_found)?;
        if record.is_visible_at(self.clock.now()) {
            Ok(record)
        } else {
            Err(not_found())
        }
    }

    /// Count the owner's live pages. Caller holds the owner lock.
    async fn live_page_count(&self, key_id: &str) -> Result<u64, PageError> {
        let now = self.clock.now();
        let mut count = 0u64;
        for key in self.storage.list(&owner_dir(key_id)).await? {
            let Some(value) = self.storage.get(&key).await? else {
                continue;
            };
            if index_entry_live(&key, &value, now)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Validate and persist a new page owned by `owner`.
    ///
    /// Content size is checked before anything touches storage. The quota
    /// check and the write happen under the owner's lock, so concurrent
    /// creates by one key can never exceed `max_pages`.
    ///
    /// # Errors
    ///
    /// - [`PageError::Forbidden`] if `owner` lacks `create`.
    /// - [`PageError::Validation`] for empty or oversized text fields, or a bad expiry.
    /// - [`PageError::PayloadTooLarge`] if the HTML exceeds the ceiling.
    /// - [`PageError::QuotaExceeded`] if the key already holds `max_pages` live pages.
    /// - [`PageError::IdExhausted`] if no free id was found.
    pub async fn create_page(
        &self,
        request: CreatePageRequest,
        owner: &KeyContext,
    ) -> Result<PageRecord, PageError> {
        if !owner.has(Permission::Create) {
            return Err(PageError::Forbidden {
                reason: "key lacks the create permission".to_owned(),
            });
        }

        let title = check_text("title", &request.title, MAX_TITLE_CHARS)?;
        let description = check_text("description", &request.description, MAX_DESCRIPTION_CHARS)?;
        if request.html_content.trim().is_empty() {
            return Err(PageError::Validation {
                reason: "html_content must not be empty".to_owned(),
            });
        }
        let size = request.html_content.len();
        let limit = self.limits.max_html_bytes();
        if size > limit {
            return Err(PageError::PayloadTooLarge { size, limit });
        }
        if request.expires_in_days > MAX_PAGE_EXPIRE_DAYS {
            return Err(PageError::Validation {
                reason: format!("expires_in_days must be 0 to {MAX_PAGE_EXPIRE_DAYS}"),
            });
        }

        let guard = self.locks.lock(&owner_dir(&owner.key_id)).await;

        if !owner.is_admin() {
            let live = self.live_page_count(&owner.key_id).await?;
            if live >= u64::from(owner.max_pages) {
                debug!(key_id = %owner.key_id, live, "page quota reached");
                return Err(PageError::QuotaExceeded {
                    max_pages: owner.max_pages,
                });
            }
        }

        let mut allocated = None;
        for _ in 0..ID_ATTEMPTS {
            let candidate = generate_page_id();
            if !self.storage.exists(&page_key(&candidate)).await? {
                allocated = Some(candidate);
                break;
            }
        }
        let page_id = allocated.ok_or(PageError::IdExhausted {
            attempts: ID_ATTEMPTS,
        })?;

        let now = self.clock.now();
        let expires_at = (request.expires_in_days > 0)
            .then(|| now + Duration::days(i64::from(request.expires_in_days)));

        let record = PageRecord {
            page_id: page_id.clone(),
            title,
            description,
            html_content: request.html_content,
            created_at: now,
            expires_at,
            created_by: owner.key_id.clone(),
            is_active: true,
        };

        let key = page_key(&page_id);
        let bytes = encode(&key, &record)?;
        let stats = Arc::clone(&self.stats);
        commit(
            &self.storage,
            vec![
                WriteOp::put(key, bytes),
                WriteOp::put(owner_key(&owner.key_id, &page_id), encode_expiry(expires_at)),
            ],
            guard,
            move || stats.record_page_created(),
        )
        .await?;

        info!(
            page_id = %record.page_id,
            key_id = %owner.key_id,
            size,
            expires_at = ?record.expires_at,
            "page created"
        );

        Ok(record)
    }

    /// Fetch a live page, content included.
    ///
    /// # Errors
    ///
    /// [`PageError::NotFound`] if the page is absent, tombstoned or expired.
    pub async fn get_page(&self, page_id: &str) -> Result<PageRecord, PageError> {
        self.load_visible(page_id).await
    }

    /// Metadata for a live page. Requires `view`.
    ///
    /// # Errors
    ///
    /// - [`PageError::Forbidden`] if `requester` lacks `view`.
    /// - [`PageError::NotFound`] if the page is not live.
    pub async fn page_info(
        &self,
        page_id: &str,
        requester: &KeyContext,
    ) -> Result<PageInfo, PageError> {
        if !requester.has(Permission::View) {
            return Err(PageError::Forbidden {
                reason: "key lacks the view permission".to_owned(),
            });
        }
        let record = self.load_visible(page_id).await?;
        let access = self.load_access(page_id).await?;
        Ok(record.info(access))
    }

    /// Count one public fetch of `page`, as returned by [`get_page`](Self::get_page).
    /// Returns the new access count.
    ///
    /// Only the page's access record is rewritten; the page itself is not
    /// touched, so fetches of one page serialise on a few bytes of I/O.
    ///
    /// # Errors
    ///
    /// [`PageError::NotFound`] if the page expired since it was loaded.
    pub async fn record_access(&self, page: &PageRecord) -> Result<u64, PageError> {
        let now = self.clock.now();
        if !page.is_visible_at(now) {
            return Err(PageError::NotFound {
                page_id: page.page_id.clone(),
            });
        }

        let key = access_key(&page.page_id);
        let guard = self.locks.lock(&key).await;
        let mut access = self.load_access(&page.page_id).await?;
        access.access_count = access.access_count.saturating_add(1);
        access.last_accessed = Some(now);

        let bytes = encode(&key, &access)?;
        let stats = Arc::clone(&self.stats);
        commit(
            &self.storage,
            vec![WriteOp::put(key, bytes)],
            guard,
            move || stats.record_access(),
        )
        .await?;

        Ok(access.access_count)
    }

    /// Delete a page. Allowed for the admin, or the owning key when it
    /// holds `delete`.
    ///
    /// # Errors
    ///
    /// - [`PageError::NotFound`] if the page is not live.
    /// - [`PageError::Forbidden`] if `requester` may not delete it.
    pub async fn delete_page(&self, page_id: &str, requester: &KeyContext) -> Result<(), PageError> {
        let guard = self.locks.lock(&page_key(page_id)).await;
        let mut record = self.load_visible(page_id).await?;

        let owns = record.created_by == requester.key_id;
        if !(requester.is_admin() || (owns && requester.has(Permission::Delete))) {
            return Err(PageError::Forbidden {
                reason: if owns {
                    "key lacks the delete permission".to_owned()
                } else {
                    "only the owning key or the admin may delete a page".to_owned()
                },
            });
        }

        self.retire(&mut record, guard).await?;
        info!(page_id, deleted_by = %requester.key_id, "page deleted");
        Ok(())
    }

    /// Tombstone a record and drop its owner index entry in one batch.
    /// `guard` is the page lock, released once the batch lands.
    async fn retire(&self, record: &mut PageRecord, guard: RecordGuard) -> Result<(), PageError> {
        let owner_entry = owner_key(&record.created_by, &record.page_id);
        record.tombstone();

        let key = page_key(&record.page_id);
        let bytes = encode(&key, &*record)?;
        let stats = Arc::clone(&self.stats);
        commit(
            &self.storage,
            vec![WriteOp::put(key, bytes), WriteOp::delete(owner_entry)],
            guard,
            move || stats.record_page_removed(),
        )
        .await?;
        Ok(())
    }

    /// Live pages, newest first. Admin only. `limit` is clamped to 1..=500.
    ///
    /// # Errors
    ///
    /// - [`PageError::Forbidden`] if `caller` is not admin.
    /// - [`PageError::Storage`] / [`PageError::Corrupt`] on backend failure.
    pub async fn list_pages(
        &self,
        caller: &KeyContext,
        limit: usize,
    ) -> Result<Vec<PageInfo>, PageError> {
        if !caller.is_admin() {
            return Err(PageError::Forbidden {
                reason: "listing pages requires the admin permission".to_owned(),
            });
        }
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let now = self.clock.now();

        let mut pages = Vec::new();
        for key in self.storage.list(OWNER_PREFIX).await? {
            let Some(page_id) = key.rsplit('/').next() else {
                continue;
            };
            let Some(record) = self.load(page_id).await? else {
                continue;
            };
            if record.is_visible_at(now) {
                let access = self.load_access(page_id).await?;
                pages.push(record.info(access));
            }
        }
        pages.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.page_id.cmp(&b.page_id))
        });
        pages.truncate(limit);
        Ok(pages)
    }

    /// Tombstone every page past its expiry. Returns how many were retired.
    ///
    /// Reads already hide expired pages; the sweep reclaims their content
    /// and frees the owner's quota slot for listing purposes.
    ///
    /// # Errors
    ///
    /// Returns [`PageError::Storage`] if listing the owner index fails.
    /// Failures on individual pages are logged and skipped.
    pub async fn sweep_expired(&self) -> Result<usize, PageError> {
        let now = self.clock.now();
        let mut retired = 0usize;

        for key in self.storage.list(OWNER_PREFIX).await? {
            let Some(value) = self.storage.get(&key).await? else {
                continue;
            };
            match index_entry_live(&key, &value, now) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "skipping unreadable owner index entry");
                    continue;
                }
            }
            let Some(page_id) = key.rsplit('/').next() else {
                continue;
            };
            match self.expire_one(page_id, now).await {
                Ok(true) => retired += 1,
                Ok(false) => {}
                Err(e) => warn!(page_id, error = %e, "failed to retire expired page"),
            }
        }

        if retired > 0 {
            info!(retired, "expired pages swept");
        }
        Ok(retired)
    }

    async fn expire_one(&self, page_id: &str, now: DateTime<Utc>) -> Result<bool, PageError> {
        let guard = self.locks.lock(&page_key(page_id)).await;
        let Some(mut record) = self.load(page_id).await? else {
            return Ok(false);
        };
        if !record.is_active || !record.is_expired_at(now) {
            return Ok(false);
        }
        self.retire(&mut record, guard).await?;
        Ok(true)
    }
}

//! Access key manager for Pagedrop.
//!
//! Every authenticated request presents one access key as a bearer secret.
//! Secrets are never stored in plaintext: only their SHA-256 digest is
//! persisted, alongside a digest-to-id index used for lookup. The plaintext
//! is returned exactly once, when the key is issued.
//!
//! # Key model
//!
//! - The admin key (`key_id = "admin"`) holds every permission and has no
//!   page quota. It is set once via [`KeyManager::initialize_admin`] and can
//!   only be replaced by [`KeyManager::rotate_admin`], never revoked.
//! - Shared keys are issued by the admin with a permission subset, a page
//!   quota and an optional expiry.
//! - Revocation flips `is_active`; the record and its digest index stay so a
//!   revoked secret reports as revoked rather than unknown.
//! - Digest comparison uses `subtle::ConstantTimeEq`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pagedrop_storage::{StorageBackend, StorageError, WriteOp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{AuthError, CorruptRecord, KeyError};
use crate::locks::LockTable;
use crate::stats::StatsAggregator;
use crate::{commit, decode, encode};

/// Storage prefix for key records.
pub const KEY_PREFIX: &str = "keys/";

/// Storage prefix for the secret digest → key id index.
pub const KEY_HASH_PREFIX: &str = "key-hashes/";

/// Fixed id of the admin key.
pub const ADMIN_KEY_ID: &str = "admin";

/// Page quota for shared keys created without an explicit `max_pages`.
pub const DEFAULT_MAX_PAGES: u32 = 100;

const SECRET_PREFIX: &str = "pd_";
const MIN_ADMIN_SECRET_CHARS: usize = 8;
const MAX_KEY_NAME_CHARS: usize = 100;
const MAX_KEY_EXPIRE_DAYS: u32 = 3650;
const ID_ATTEMPTS: u32 = 5;

/// An action a key may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Create,
    View,
    Delete,
    /// Implies every other permission.
    Admin,
}

impl Permission {
    pub const ALL: [Self; 4] = [Self::Create, Self::View, Self::Delete, Self::Admin];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::View => "view",
            Self::Delete => "delete",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| KeyError::Validation {
                reason: format!(
                    "unknown permission '{s}' (expected one of: create, view, delete, admin)"
                ),
            })
    }
}

/// A stored access key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: String,
    pub key_name: String,
    /// SHA-256 of the secret, hex-encoded.
    pub secret_hash: String,
    pub permissions: BTreeSet<Permission>,
    pub max_pages: u32,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Id of the key that issued this one (`None` for the admin key).
    #[serde(default)]
    pub created_by: Option<String>,
}

impl KeyRecord {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }

    #[must_use]
    pub fn info(&self) -> ApiKeyInfo {
        ApiKeyInfo {
            key_id: self.key_id.clone(),
            key_name: self.key_name.clone(),
            permissions: self.permissions.clone(),
            max_pages: self.max_pages,
            usage_count: self.usage_count,
            created_at: self.created_at,
            expires_at: self.expires_at,
            is_active: self.is_active,
            created_by: self.created_by.clone(),
        }
    }

    fn context(&self) -> KeyContext {
        KeyContext {
            key_id: self.key_id.clone(),
            key_name: self.key_name.clone(),
            permissions: self.permissions.clone(),
            max_pages: self.max_pages,
        }
    }
}

/// The identity a validated key grants for the rest of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyContext {
    pub key_id: String,
    pub key_name: String,
    pub permissions: BTreeSet<Permission>,
    pub max_pages: u32,
}

impl KeyContext {
    /// Whether this key may perform `required`. `admin` implies everything.
    #[must_use]
    pub fn has(&self, required: Permission) -> bool {
        self.permissions.contains(&Permission::Admin) || self.permissions.contains(&required)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.permissions.contains(&Permission::Admin)
    }
}

/// Public view of a key. Never includes the secret or its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyInfo {
    pub key_id: String,
    pub key_name: String,
    pub permissions: BTreeSet<Permission>,
    pub max_pages: u32,
    pub usage_count: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: Option<String>,
}

/// A freshly issued key. `api_key` is the only copy of the secret.
#[derive(Clone, Serialize)]
pub struct IssuedKey {
    pub api_key: String,
    #[serde(flatten)]
    pub info: ApiKeyInfo,
}

impl fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedKey")
            .field("api_key", &"[redacted]")
            .field("info", &self.info)
            .finish()
    }
}

/// Parameters for issuing a shared key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateKeyParams {
    #[serde(default)]
    pub key_name: String,
    /// Defaults to `create` + `view` when absent.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// `0` or absent means the key never expires.
    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

/// Hash a secret for storage and lookup (SHA-256, hex-encoded).
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn digests_match(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

fn record_key(key_id: &str) -> String {
    format!("{KEY_PREFIX}{key_id}")
}

fn hash_index_key(digest: &str) -> String {
    format!("{KEY_HASH_PREFIX}{digest}")
}

fn generate_secret() -> String {
    format!("{SECRET_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

fn generate_key_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("key_{}", &raw[..12])
}

fn parse_permissions(requested: Option<Vec<String>>) -> Result<BTreeSet<Permission>, KeyError> {
    let Some(names) = requested else {
        return Ok(BTreeSet::from([Permission::Create, Permission::View]));
    };
    if names.is_empty() {
        return Err(KeyError::Validation {
            reason: "permissions must not be empty".to_owned(),
        });
    }
    names.iter().map(|n| n.parse()).collect()
}

fn require_admin(caller: &KeyContext, action: &str) -> Result<(), KeyError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(KeyError::Forbidden {
            reason: format!("{action} requires the admin permission"),
        })
    }
}

fn check_admin_secret(secret: &str) -> Result<&str, KeyError> {
    let secret = secret.trim();
    if secret.chars().count() < MIN_ADMIN_SECRET_CHARS {
        return Err(KeyError::Validation {
            reason: format!("admin key must be at least {MIN_ADMIN_SECRET_CHARS} characters"),
        });
    }
    Ok(secret)
}

/// Issues, validates and revokes access keys.
pub struct KeyManager {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    locks: Arc<LockTable>,
    stats: Arc<StatsAggregator>,
}

impl KeyManager {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        locks: Arc<LockTable>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            storage,
            clock,
            locks,
            stats,
        }
    }

    /// Fail-closed permission check; `admin` implies every permission.
    #[must_use]
    pub fn check_permission(context: &KeyContext, required: Permission) -> bool {
        context.has(required)
    }

    async fn load<E>(&self, key_id: &str) -> Result<Option<KeyRecord>, E>
    where
        E: From<StorageError> + From<CorruptRecord>,
    {
        let key = record_key(key_id);
        match self.storage.get(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn store<E>(&self, record: &KeyRecord) -> Result<(), E>
    where
        E: From<StorageError> + From<CorruptRecord>,
    {
        let key = record_key(&record.key_id);
        let bytes = encode(&key, record)?;
        self.storage.put(&key, &bytes).await?;
        Ok(())
    }

    /// Resolve a presented secret to the key it belongs to.
    ///
    /// Checks run in order: unknown secret, revoked, expired. Every accepted
    /// validation bumps the key's `usage_count`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidKey`] if no key matches.
    /// - [`AuthError::Inactive`] if the key was revoked.
    /// - [`AuthError::Expired`] if the key is past its expiry.
    /// - [`AuthError::Storage`] / [`AuthError::Corrupt`] on backend failure.
    pub async fn validate(&self, presented: &str) -> Result<KeyContext, AuthError> {
        let presented = presented.trim();
        if presented.is_empty() {
            return Err(AuthError::InvalidKey);
        }
        let digest = hash_secret(presented);
        let index_key = hash_index_key(&digest);

        let Some(id_bytes) = self.storage.get(&index_key).await? else {
            return Err(AuthError::InvalidKey);
        };
        let key_id = String::from_utf8(id_bytes).map_err(|e| CorruptRecord {
            key: index_key,
            reason: e.to_string(),
        })?;

        let _guard = self.locks.lock(&record_key(&key_id)).await;
        let mut record: KeyRecord = self
            .load::<AuthError>(&key_id)
            .await?
            .ok_or(AuthError::InvalidKey)?;

        if !digests_match(&record.secret_hash, &digest) {
            return Err(AuthError::InvalidKey);
        }
        if !record.is_active {
            return Err(AuthError::Inactive);
        }
        let now = self.clock.now();
        if let Some(expired_at) = record.expires_at.filter(|t| now >= *t) {
            return Err(AuthError::Expired {
                expired_at: expired_at.to_rfc3339(),
            });
        }

        record.usage_count = record.usage_count.saturating_add(1);
        self.store::<AuthError>(&record).await?;

        Ok(record.context())
    }

    /// Issue a new shared key. Only the admin may do this.
    ///
    /// # Errors
    ///
    /// - [`KeyError::Forbidden`] if `caller` is not admin.
    /// - [`KeyError::Validation`] for a bad name, permission list, quota or expiry.
    /// - [`KeyError::Storage`] if persisting fails.
    pub async fn create_key(
        &self,
        caller: &KeyContext,
        params: CreateKeyParams,
    ) -> Result<IssuedKey, KeyError> {
        require_admin(caller, "creating keys")?;

        let key_name = params.key_name.trim();
        let name_len = key_name.chars().count();
        if name_len == 0 || name_len > MAX_KEY_NAME_CHARS {
            return Err(KeyError::Validation {
                reason: format!("key_name must be 1 to {MAX_KEY_NAME_CHARS} characters"),
            });
        }
        let permissions = parse_permissions(params.permissions)?;
        let max_pages = params.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        if max_pages == 0 {
            return Err(KeyError::Validation {
                reason: "max_pages must be at least 1".to_owned(),
            });
        }
        let expires_in_days = params.expires_in_days.unwrap_or(0);
        if expires_in_days > MAX_KEY_EXPIRE_DAYS {
            return Err(KeyError::Validation {
                reason: format!("expires_in_days must be 0 to {MAX_KEY_EXPIRE_DAYS}"),
            });
        }

        let mut allocated = None;
        for _ in 0..ID_ATTEMPTS {
            let candidate = generate_key_id();
            if !self.storage.exists(&record_key(&candidate)).await? {
                allocated = Some(candidate);
                break;
            }
        }
        let key_id = allocated.ok_or(KeyError::IdExhausted {
            attempts: ID_ATTEMPTS,
        })?;

        let secret = generate_secret();
        let digest = hash_secret(&secret);
        let now = self.clock.now();

        let record = KeyRecord {
            key_id: key_id.clone(),
            key_name: key_name.to_owned(),
            secret_hash: digest.clone(),
            permissions,
            max_pages,
            usage_count: 0,
            created_at: now,
            expires_at: (expires_in_days > 0)
                .then(|| now + Duration::days(i64::from(expires_in_days))),
            is_active: true,
            created_by: Some(caller.key_id.clone()),
        };

        let key = record_key(&key_id);
        let bytes = encode(&key, &record)?;
        let guard = self.locks.lock(&key).await;
        let stats = Arc::clone(&self.stats);
        commit(
            &self.storage,
            vec![
                WriteOp::put(key, bytes),
                WriteOp::put(hash_index_key(&digest), key_id.into_bytes()),
            ],
            guard,
            move || stats.record_key_created(),
        )
        .await?;

        info!(
            key_id = %record.key_id,
            key_name = %record.key_name,
            created_by = %caller.key_id,
            "access key created"
        );

        Ok(IssuedKey {
            api_key: secret,
            info: record.info(),
        })
    }

    /// Deactivate a shared key. Revoking an already revoked key succeeds.
    ///
    /// # Errors
    ///
    /// - [`KeyError::Forbidden`] if `caller` is not admin, or `key_id` is the admin key.
    /// - [`KeyError::NotFound`] if no such key exists.
    pub async fn revoke(&self, caller: &KeyContext, key_id: &str) -> Result<(), KeyError> {
        require_admin(caller, "revoking keys")?;
        if key_id == ADMIN_KEY_ID {
            return Err(KeyError::Forbidden {
                reason: "the admin key cannot be revoked".to_owned(),
            });
        }

        let key = record_key(key_id);
        let guard = self.locks.lock(&key).await;
        let mut record: KeyRecord = self
            .load::<KeyError>(key_id)
            .await?
            .ok_or_else(|| KeyError::NotFound {
                key_id: key_id.to_owned(),
            })?;

        if !record.is_active {
            debug!(key_id, "access key already revoked");
            return Ok(());
        }

        record.is_active = false;
        let bytes = encode(&key, &record)?;
        let stats = Arc::clone(&self.stats);
        commit(
            &self.storage,
            vec![WriteOp::put(key, bytes)],
            guard,
            move || stats.record_key_revoked(),
        )
        .await?;

        info!(key_id, revoked_by = %caller.key_id, "access key revoked");
        Ok(())
    }

    /// Set the admin secret. Only succeeds once.
    ///
    /// # Errors
    ///
    /// - [`KeyError::AlreadyInitialized`] if an admin key exists.
    /// - [`KeyError::Validation`] if the secret is shorter than 8 characters.
    pub async fn initialize_admin(&self, secret: &str) -> Result<(), KeyError> {
        let secret = check_admin_secret(secret)?;
        let digest = hash_secret(secret);

        let _guard = self.locks.lock(&record_key(ADMIN_KEY_ID)).await;
        if self.storage.exists(&record_key(ADMIN_KEY_ID)).await? {
            return Err(KeyError::AlreadyInitialized);
        }
        if self.storage.exists(&hash_index_key(&digest)).await? {
            return Err(KeyError::Validation {
                reason: "admin key must differ from every issued access key".to_owned(),
            });
        }

        let record = KeyRecord {
            key_id: ADMIN_KEY_ID.to_owned(),
            key_name: ADMIN_KEY_ID.to_owned(),
            secret_hash: digest.clone(),
            permissions: Permission::ALL.into_iter().collect(),
            max_pages: u32::MAX,
            usage_count: 0,
            created_at: self.clock.now(),
            expires_at: None,
            is_active: true,
            created_by: None,
        };

        let key = record_key(ADMIN_KEY_ID);
        let bytes = encode(&key, &record)?;
        self.storage
            .apply(vec![
                WriteOp::put(key, bytes),
                WriteOp::put(hash_index_key(&digest), ADMIN_KEY_ID.as_bytes().to_vec()),
            ])
            .await?;

        info!("admin key initialized");
        Ok(())
    }

    /// Replace the admin secret. The old secret must be presented.
    ///
    /// # Errors
    ///
    /// - [`KeyError::NotInitialized`] if no admin key exists.
    /// - [`KeyError::Forbidden`] if `old` does not match the current secret.
    /// - [`KeyError::Validation`] if `new` is too short.
    pub async fn rotate_admin(&self, old: &str, new: &str) -> Result<(), KeyError> {
        let new = check_admin_secret(new)?;
        let old_digest = hash_secret(old.trim());
        let new_digest = hash_secret(new);

        let _guard = self.locks.lock(&record_key(ADMIN_KEY_ID)).await;
        let mut record: KeyRecord = self
            .load::<KeyError>(ADMIN_KEY_ID)
            .await?
            .ok_or(KeyError::NotInitialized)?;

        if !digests_match(&record.secret_hash, &old_digest) {
            return Err(KeyError::Forbidden {
                reason: "current admin key does not match".to_owned(),
            });
        }
        if !digests_match(&new_digest, &old_digest)
            && self.storage.exists(&hash_index_key(&new_digest)).await?
        {
            return Err(KeyError::Validation {
                reason: "admin key must differ from every issued access key".to_owned(),
            });
        }

        record.secret_hash.clone_from(&new_digest);
        let key = record_key(ADMIN_KEY_ID);
        let bytes = encode(&key, &record)?;
        self.storage
            .apply(vec![
                WriteOp::delete(hash_index_key(&old_digest)),
                WriteOp::put(hash_index_key(&new_digest), ADMIN_KEY_ID.as_bytes().to_vec()),
                WriteOp::put(key, bytes),
            ])
            .await?;

        info!("admin key rotated");
        Ok(())
    }

    /// Active shared keys, newest first. The admin key is not listed.
    ///
    /// # Errors
    ///
    /// - [`KeyError::Forbidden`] if `caller` is not admin.
    /// - [`KeyError::Storage`] / [`KeyError::Corrupt`] on backend failure.
    pub async fn list_keys(&self, caller: &KeyContext) -> Result<Vec<ApiKeyInfo>, KeyError> {
        require_admin(caller, "listing keys")?;

        let mut records = Vec::new();
        for key in self.storage.list(KEY_PREFIX).await? {
            let key_id = &key[KEY_PREFIX.len()..];
            if key_id == ADMIN_KEY_ID {
                continue;
            }
            if let Some(record) = self.load::<KeyError>(key_id).await? {
                if record.is_active {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.key_id.cmp(&b.key_id))
        });

        Ok(records.iter().map(KeyRecord::info).collect())
    }

    /// Whether an admin key has been set.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn is_initialized(&self) -> Result<bool, StorageError> {
        self.storage.exists(&record_key(ADMIN_KEY_ID)).await
    }
}

//! Shared application state for the Pagedrop server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It owns the core services and the public base
//! URL used to build page links.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use pagedrop_core::Services;
use pagedrop_core::clock::{Clock, SystemClock};
use pagedrop_core::error::KeyError;
use pagedrop_core::keys::KeyManager;
use pagedrop_core::pages::PageStore;
use pagedrop_core::stats::StatsAggregator;
use pagedrop_storage::StorageBackend;

use crate::config::ServerConfig;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Access key issue, validation and revocation.
    pub keys: KeyManager,
    /// Page persistence, quotas and expiry.
    pub pages: PageStore,
    /// Usage counters.
    pub stats: Arc<StatsAggregator>,
    /// Base URL for page links, without a trailing slash.
    pub public_url: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl AppState {
    #[must_use]
    pub fn new(services: Services, public_url: impl Into<String>) -> Self {
        Self {
            keys: services.keys,
            pages: services.pages,
            stats: services.stats,
            public_url: public_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Public link for a page.
    #[must_use]
    pub fn page_url(&self, page_id: &str) -> String {
        format!("{}/{page_id}", self.public_url)
    }
}

/// Build the application state over an opened backend.
///
/// Rebuilds the usage counters from storage and, when the config carries an
/// admin key and none is stored yet, initializes it.
///
/// # Errors
///
/// Fails if the initial storage scan fails or the configured admin key is
/// rejected.
pub async fn build_app_state(
    config: &ServerConfig,
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<AppState>> {
    let services = Services::open(storage, clock, config.page_limits())
        .await
        .context("failed to load usage counters from storage")?;

    if let Some(admin_key) = &config.admin_key {
        match services.keys.initialize_admin(admin_key).await {
            Ok(()) => info!("admin key initialized from PAGEDROP_ADMIN_KEY"),
            Err(KeyError::AlreadyInitialized) => {
                info!("admin key already set, ignoring PAGEDROP_ADMIN_KEY");
            }
            Err(e) => return Err(e).context("PAGEDROP_ADMIN_KEY was rejected"),
        }
    }

    Ok(Arc::new(AppState::new(services, config.public_url.clone())))
}

/// [`build_app_state`] with the wall clock.
///
/// # Errors
///
/// See [`build_app_state`].
pub async fn build_default_app_state(
    config: &ServerConfig,
    storage: Arc<dyn StorageBackend>,
) -> anyhow::Result<Arc<AppState>> {
    build_app_state(config, storage, Arc::new(SystemClock)).await
}

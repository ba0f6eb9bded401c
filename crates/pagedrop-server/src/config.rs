//! Server configuration for Pagedrop.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `PAGEDROP_*` environment variables.

use std::net::SocketAddr;

use pagedrop_core::pages::{DEFAULT_HTML_KB, MAX_HTML_KB, MIN_HTML_KB, PageLimits};

const DEFAULT_PORT: u16 = 8787;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Base URL used to build page links, without a trailing slash.
    pub public_url: String,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// HTML ceiling in KiB, already clamped to 10..=2000.
    pub max_html_kb: u32,
    /// Admin secret applied at startup if no admin key exists yet.
    pub admin_key: Option<String>,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("public_url", &self.public_url)
            .field("storage_backend", &self.storage_backend)
            .field("log_level", &self.log_level)
            .field("max_html_kb", &self.max_html_kb)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "[redacted]"))
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Supported storage backend types.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
    /// PostgreSQL persistent storage.
    Postgres { url: String },
}

impl std::fmt::Debug for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::RocksDb { path } => f.debug_struct("RocksDb").field("path", path).finish(),
            Self::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("url", &"[redacted]")
                .finish(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let bind_addr = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT));
        Self {
            bind_addr,
            public_url: format!("http://{bind_addr}"),
            storage_backend: StorageBackendType::Memory,
            log_level: "info".to_owned(),
            max_html_kb: DEFAULT_HTML_KB,
            admin_key: None,
            sweep_interval_secs: 300,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (platform convention, binds to `0.0.0.0`)
    /// - `PAGEDROP_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8787`)
    /// - `PAGEDROP_PUBLIC_URL`: base URL for page links (default: `http://<bind_addr>`)
    /// - `PAGEDROP_STORAGE`: `memory`, `rocksdb`, or `postgres` (default: `memory`)
    /// - `PAGEDROP_STORAGE_PATH`: path for `RocksDB` (default: `./data`)
    /// - `DATABASE_URL`: PostgreSQL connection string (used when `PAGEDROP_STORAGE=postgres`)
    /// - `PAGEDROP_LOG_LEVEL`: log filter (default: `info`)
    /// - `PAGEDROP_MAX_HTML_KB`: HTML ceiling in KiB, clamped to 10..=2000 (default: `500`)
    /// - `PAGEDROP_ADMIN_KEY`: admin secret to initialize on first start (optional)
    /// - `PAGEDROP_SWEEP_INTERVAL`: seconds between expiry sweeps (default: `300`)
    /// - `PAGEDROP_REQUEST_TIMEOUT`: per-request timeout in seconds (default: `30`)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // Priority: PAGEDROP_BIND_ADDR > PORT > default 127.0.0.1:8787
        let bind_addr = if let Ok(addr) = std::env::var("PAGEDROP_BIND_ADDR") {
            addr.parse().unwrap_or(defaults.bind_addr)
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(DEFAULT_PORT);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            defaults.bind_addr
        };

        let public_url = std::env::var("PAGEDROP_PUBLIC_URL")
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_owned())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("http://{bind_addr}"));

        let storage_path =
            std::env::var("PAGEDROP_STORAGE_PATH").unwrap_or_else(|_| "./data".to_owned());

        let storage_backend = match std::env::var("PAGEDROP_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/pagedrop".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = std::env::var("PAGEDROP_LOG_LEVEL").unwrap_or(defaults.log_level);

        let max_html_kb = std::env::var("PAGEDROP_MAX_HTML_KB")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_HTML_KB)
            .clamp(MIN_HTML_KB, MAX_HTML_KB);

        let admin_key = std::env::var("PAGEDROP_ADMIN_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let sweep_interval_secs = std::env::var("PAGEDROP_SWEEP_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&secs: &u64| secs > 0)
            .unwrap_or(defaults.sweep_interval_secs);

        let request_timeout_secs = std::env::var("PAGEDROP_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&secs: &u64| secs > 0)
            .unwrap_or(defaults.request_timeout_secs);

        Self {
            bind_addr,
            public_url,
            storage_backend,
            log_level,
            max_html_kb,
            admin_key,
            sweep_interval_secs,
            request_timeout_secs,
        }
    }

    #[must_use]
    pub fn page_limits(&self) -> PageLimits {
        PageLimits::from_kb(self.max_html_kb)
    }

    /// Request body ceiling: the HTML limit JSON-escaped in the worst case,
    /// plus room for the other fields.
    ///
    /// An escaping encoder writes a control byte as `\u00XX` and a 4-byte
    /// character as a `\uXXXX\uXXXX` surrogate pair, so each content byte
    /// can cost up to 6 body bytes.
    #[must_use]
    pub fn body_limit_bytes(&self) -> usize {
        self.page_limits()
            .max_html_bytes()
            .saturating_mul(6)
            .saturating_add(64 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_and_in_memory() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8787);
        assert_eq!(config.public_url, "http://127.0.0.1:8787");
        assert_eq!(config.storage_backend, StorageBackendType::Memory);
        assert_eq!(config.page_limits().max_html_bytes(), 500 * 1024);
    }

    #[test]
    fn body_limit_covers_fully_escaped_html() {
        let config = ServerConfig {
            max_html_kb: 10,
            ..ServerConfig::default()
        };
        assert_eq!(config.body_limit_bytes(), 6 * 10 * 1024 + 64 * 1024);

        let largest = ServerConfig {
            max_html_kb: 2000,
            ..ServerConfig::default()
        };
        assert_eq!(largest.body_limit_bytes(), 6 * 2000 * 1024 + 64 * 1024);
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = ServerConfig {
            admin_key: Some("super-secret-admin".to_owned()),
            storage_backend: StorageBackendType::Postgres {
                url: "postgres://user:pw@db/pagedrop".to_owned(),
            },
            ..ServerConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-admin"));
        assert!(!rendered.contains("pw@db"));
    }
}

//! Service configuration parsed from environment variables.
//!
//! Variables (all optional unless noted):
//! - `PORT`: listen port, default 3000
//! - `DATABASE_URL`: Postgres URL; absent selects the in-memory backend
//! - `DB_MAX_CONNECTIONS`: pool size, default 5
//! - `STORAGE_BACKEND`: `fs` (default), `http`, or `memory`
//! - `STORAGE_ROOT`: root directory for `fs`, default `./data/objects`
//! - `STORAGE_URL`: storage API base URL, required for `http`
//! - `STORAGE_BUCKET`: bucket for `http`, default `drawing-files`
//! - `STORAGE_API_KEY`: bearer key for `http`
//! - `AUTOSAVE_INTERVAL_MS`: autosave period, default 30000
//! - `MAX_BODY_BYTES`: request body limit, default 25 MiB. Scene pushes
//!   carry attachments inline as base64 data URLs
//! - `DEV_USER_EMAIL`: with the in-memory backend, seed this account and
//!   log a bearer token for it at startup

use std::path::PathBuf;
use std::time::Duration;

use crate::services::sync::SyncConfig;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_STORAGE_ROOT: &str = "./data/objects";
pub const DEFAULT_STORAGE_BUCKET: &str = "drawing-files";
pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown STORAGE_BACKEND: {0}")]
    UnknownStorageBackend(String),
    #[error("{0} is required for the selected storage backend")]
    Missing(&'static str),
    #[error("AUTOSAVE_INTERVAL_MS must be greater than zero")]
    ZeroAutosaveInterval,
    #[error("MAX_BODY_BYTES must be greater than zero")]
    ZeroBodyLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Fs { root: PathBuf },
    Http { base_url: String, bucket: String, api_key: Option<String> },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub max_body_bytes: usize,
    pub dev_user_email: Option<String>,
}

impl AppConfig {
    /// Build the config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown storage backend, a missing storage
    /// URL, a zero autosave interval, or a zero body limit.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`AppConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let autosave_ms = env_parse(var("AUTOSAVE_INTERVAL_MS"), DEFAULT_AUTOSAVE_INTERVAL_MS);
        if autosave_ms == 0 {
            return Err(ConfigError::ZeroAutosaveInterval);
        }
        let max_body_bytes = env_parse(var("MAX_BODY_BYTES"), DEFAULT_MAX_BODY_BYTES);
        if max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }

        Ok(Self {
            port: env_parse(var("PORT"), DEFAULT_PORT),
            database_url: var("DATABASE_URL"),
            db_max_connections: env_parse(var("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS),
            storage: parse_storage(&var)?,
            sync: SyncConfig { autosave_interval: Duration::from_millis(autosave_ms) },
            max_body_bytes,
            dev_user_email: var("DEV_USER_EMAIL"),
        })
    }
}

/// Parse an optional raw value, falling back to `default` when absent or
/// malformed.
pub(crate) fn env_parse<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

fn parse_storage(var: &impl Fn(&str) -> Option<String>) -> Result<StorageConfig, ConfigError> {
    let kind = var("STORAGE_BACKEND").map(|v| v.to_ascii_lowercase());
    match kind.as_deref().unwrap_or("fs") {
        "fs" => Ok(StorageConfig::Fs {
            root: var("STORAGE_ROOT").map_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT), PathBuf::from),
        }),
        "http" => Ok(StorageConfig::Http {
            base_url: var("STORAGE_URL")
                .ok_or(ConfigError::Missing("STORAGE_URL"))?
                .trim_end_matches('/')
                .to_owned(),
            bucket: var("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_STORAGE_BUCKET.to_owned()),
            api_key: var("STORAGE_API_KEY"),
        }),
        "memory" => Ok(StorageConfig::Memory),
        other => Err(ConfigError::UnknownStorageBackend(other.to_owned())),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

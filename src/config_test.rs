use super::*;
use std::collections::HashMap;

fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    AppConfig::from_lookup(|key| map.get(key).cloned())
}

#[test]
fn defaults_without_variables() {
    let cfg = config(&[]).unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert!(cfg.database_url.is_none());
    assert_eq!(cfg.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
    assert_eq!(cfg.storage, StorageConfig::Fs { root: PathBuf::from(DEFAULT_STORAGE_ROOT) });
    assert_eq!(cfg.sync.autosave_interval, Duration::from_millis(DEFAULT_AUTOSAVE_INTERVAL_MS));
    assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    assert!(cfg.dev_user_email.is_none());
}

#[test]
fn malformed_numbers_fall_back_to_defaults() {
    let cfg = config(&[("PORT", "eighty"), ("DB_MAX_CONNECTIONS", "-1")]).unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
}

#[test]
fn blank_database_url_is_absent() {
    let cfg = config(&[("DATABASE_URL", "  ")]).unwrap();
    assert!(cfg.database_url.is_none());
}

#[test]
fn http_storage_requires_url() {
    assert_eq!(config(&[("STORAGE_BACKEND", "http")]).unwrap_err(), ConfigError::Missing("STORAGE_URL"));

    let cfg = config(&[
        ("STORAGE_BACKEND", "HTTP"),
        ("STORAGE_URL", "https://store.example/storage/v1/"),
        ("STORAGE_API_KEY", "key"),
    ])
    .unwrap();
    assert_eq!(
        cfg.storage,
        StorageConfig::Http {
            base_url: "https://store.example/storage/v1".into(),
            bucket: DEFAULT_STORAGE_BUCKET.into(),
            api_key: Some("key".into()),
        }
    );
}

#[test]
fn memory_storage_and_custom_interval() {
    let cfg = config(&[("STORAGE_BACKEND", "memory"), ("AUTOSAVE_INTERVAL_MS", "500")]).unwrap();
    assert_eq!(cfg.storage, StorageConfig::Memory);
    assert_eq!(cfg.sync.autosave_interval, Duration::from_millis(500));
}

#[test]
fn rejects_unknown_backend_and_zero_interval() {
    assert_eq!(
        config(&[("STORAGE_BACKEND", "s3")]).unwrap_err(),
        ConfigError::UnknownStorageBackend("s3".into())
    );
    assert_eq!(config(&[("AUTOSAVE_INTERVAL_MS", "0")]).unwrap_err(), ConfigError::ZeroAutosaveInterval);
}

#[test]
fn env_parse_uses_default_for_missing_or_bad_values() {
    assert_eq!(env_parse::<u32>(None, 7), 7);
    assert_eq!(env_parse::<u32>(Some("x".into()), 7), 7);
    assert_eq!(env_parse::<u32>(Some("9".into()), 7), 9);
}

#[test]
fn dev_user_email_is_read() {
    let cfg = config(&[("DEV_USER_EMAIL", "dev@x.test")]).unwrap();
    assert_eq!(cfg.dev_user_email.as_deref(), Some("dev@x.test"));
}

#[test]
fn body_limit_is_configurable_and_nonzero() {
    let cfg = config(&[("MAX_BODY_BYTES", "1048576")]).unwrap();
    assert_eq!(cfg.max_body_bytes, 1_048_576);
    assert_eq!(config(&[("MAX_BODY_BYTES", "0")]).unwrap_err(), ConfigError::ZeroBodyLimit);
    assert!(DEFAULT_MAX_BODY_BYTES > 2 * 1024 * 1024);
}

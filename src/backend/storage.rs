//! Object storage for offloaded attachments.
//!
//! DESIGN
//! ======
//! Uploads never overwrite: a write to an occupied path fails with
//! `AlreadyExists`. The filesystem store gets this atomically by writing a
//! temp file and hard-linking it into place. The HTTP store speaks the
//! Supabase storage REST dialect with `x-upsert: false`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_STORAGE_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STORAGE_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("invalid storage base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

impl crate::error::ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::AlreadyExists(_) => "E_CONFLICT",
            Self::InvalidPath(_) => "E_INVALID_PATH",
            Self::InvalidBaseUrl(_) => "E_CONFIG",
            Self::Io(_) | Self::Http(_) | Self::Status { .. } => "E_TRANSFER",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Http(_) | Self::Status { status: 429 | 500..=599, .. })
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`. Fails with `AlreadyExists` if the path is
    /// occupied; existing content is never replaced.
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

/// Reject empty, absolute, or traversing object paths.
fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || path.starts_with('/') {
        return Err(StorageError::InvalidPath(path.to_owned()));
    }
    for component in Path::new(path).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(StorageError::InvalidPath(path.to_owned()));
        }
    }
    Ok(())
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Object store rooted at a local directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // PHASE: WRITE TEMP FILE
        // WHY: a crashed write must never leave a truncated object at `target`.
        let tmp = target.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        // PHASE: LINK INTO PLACE
        // WHY: hard_link fails on an existing target, which is the non-overwrite guarantee.
        let linked = tokio::fs::hard_link(&tmp, &target).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                debug!(path, size = bytes.len(), "stored object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(StorageError::AlreadyExists(path.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.object_path(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path.to_owned())),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Object store backed by a Supabase-compatible storage REST API.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: reqwest::Url,
    bucket: String,
    api_key: Option<String>,
}

impl HttpObjectStore {
    /// Build a client for `{base_url}/object/{bucket}/...`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute hierarchical URL or
    /// the HTTP client cannot be constructed.
    pub fn new(base_url: &str, bucket: &str, api_key: Option<String>) -> Result<Self, StorageError> {
        let parsed = reqwest::Url::parse(base_url).map_err(|e| StorageError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(StorageError::InvalidBaseUrl(base_url.to_owned()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_STORAGE_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_STORAGE_CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: parsed,
            bucket: bucket.to_owned(),
            api_key,
        })
    }

    /// Each bucket and path segment is percent-encoded on its own, so ids
    /// containing `?`, `#`, or `%` stay inside their segment.
    fn object_url(&self, path: &str) -> Result<reqwest::Url, StorageError> {
        validate_path(path)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| StorageError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("object")
            .push(&self.bucket)
            .extend(path.split('/'));
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key).header("apikey", key),
            None => request,
        }
    }
}

/// Supabase reports duplicates as 409, or as 400 with a "Duplicate" body.
fn is_duplicate_response(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && (body.contains("Duplicate") || body.contains("already exists")))
}

fn is_missing_response(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || (status == StatusCode::BAD_REQUEST && body.contains("not_found"))
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        let url = self.object_url(path)?;
        let response = self
            .authorize(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(path, size = bytes.len(), "uploaded object");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if is_duplicate_response(status, &body) {
            return Err(StorageError::AlreadyExists(path.to_owned()));
        }
        Err(StorageError::Status { status: status.as_u16(), body })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(path)?;
        let response = self.authorize(self.client.get(url)).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.bytes().await?.to_vec());
        }
        let body = response.text().await.unwrap_or_default();
        if is_missing_response(status, &body) {
            return Err(StorageError::NotFound(path.to_owned()));
        }
        Err(StorageError::Status { status: status.as_u16(), body })
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;

//! Attachment offload: inline editor files to durable object storage and back.
//!
//! DESIGN
//! ======
//! Every attachment has one storage path, `{owner}/{page}/{attachment}`,
//! derived from the document owner so shared editors write where the owner
//! would. An attachment whose prior metadata already records that path is
//! reused without touching storage. New attachments are written with a
//! non-overwriting upload; together with the stable path this gives at most
//! one durable write per attachment without content hashing.
//!
//! ERROR HANDLING
//! ==============
//! Failures are per attachment. A batch always completes: failed ids are
//! reported and left out of the resulting metadata so the next save retries
//! them. On load, unresolvable attachments are logged and skipped.

use std::fmt::Display;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{ObjectStore, StorageError};
use crate::error::ErrorCode;
use crate::model::{
    AttachmentMap, AttachmentMetadata, BinaryFile, DataUrlError, MetadataMap, decode_data_url, encode_data_url,
    now_ms,
};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment payload could not be decoded: {0}")]
    Decode(#[from] DataUrlError),
    #[error("storage path {0} already holds different content")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for AttachmentError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_ATTACHMENT_DECODE",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Storage(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.retryable(),
            Self::Decode(_) | Self::Conflict(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct AttachmentFailure {
    pub id: String,
    pub error: AttachmentError,
}

#[derive(Debug, Default)]
pub struct OffloadReport {
    /// Metadata for every attachment that is now durable, reused or new.
    pub metadata: MetadataMap,
    /// Ids written to storage by this batch.
    pub uploaded: Vec<String>,
    pub failures: Vec<AttachmentFailure>,
}

/// Storage path for an attachment: `{owner_id}/{page_id}/{attachment_id}`.
pub fn storage_path(owner_id: impl Display, page_id: impl Display, attachment_id: &str) -> String {
    format!("{owner_id}/{page_id}/{attachment_id}")
}

// =============================================================================
// OFFLOADER
// =============================================================================

#[derive(Clone)]
pub struct AttachmentOffloader {
    storage: Arc<dyn ObjectStore>,
}

impl AttachmentOffloader {
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self { storage }
    }

    /// Make every attachment in `attachments` durable.
    ///
    /// Attachments whose `prior` metadata already points at the derived path
    /// are carried over untouched. The rest are uploaded concurrently.
    pub async fn offload(
        &self,
        owner_id: Uuid,
        page_id: Uuid,
        attachments: &AttachmentMap,
        prior: &MetadataMap,
    ) -> OffloadReport {
        let mut report = OffloadReport::default();
        let mut pending = Vec::new();

        for (id, file) in attachments {
            let path = storage_path(owner_id, page_id, id);
            if let Some(existing) = prior.get(id)
                && existing.storage_path == path
            {
                report.metadata.insert(id.clone(), existing.clone());
                continue;
            }
            pending.push(self.upload_one(id, file, path));
        }

        for (id, result) in join_all(pending).await {
            match result {
                Ok(metadata) => {
                    report.uploaded.push(id.clone());
                    report.metadata.insert(id, metadata);
                }
                Err(error) => {
                    warn!(%page_id, attachment_id = %id, error = %error, "attachment offload failed");
                    report.failures.push(AttachmentFailure { id, error });
                }
            }
        }

        report
    }

    async fn upload_one(
        &self,
        id: &str,
        file: &BinaryFile,
        path: String,
    ) -> (String, Result<AttachmentMetadata, AttachmentError>) {
        let result = self.offload_file(id, file, path).await;
        (id.to_owned(), result)
    }

    async fn offload_file(&self, id: &str, file: &BinaryFile, path: String) -> Result<AttachmentMetadata, AttachmentError> {
        let bytes = decode_data_url(&file.data_url)?;
        self.write_once(&path, &bytes, &file.mime_type).await?;
        debug!(attachment_id = id, path = %path, size = bytes.len(), "attachment offloaded");
        Ok(AttachmentMetadata {
            id: id.to_owned(),
            created: file.created,
            mime_type: file.mime_type.clone(),
            storage_path: path,
            last_retrieved: file.last_retrieved,
        })
    }

    /// Non-overwriting write. An occupied path holding the same bytes is a
    /// completed earlier upload (e.g. the document write after it failed);
    /// different bytes are a conflict.
    async fn write_once(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), AttachmentError> {
        match self.storage.upload(path, bytes, content_type).await {
            Ok(()) => Ok(()),
            Err(StorageError::AlreadyExists(_)) => {
                let existing = self.storage.download(path).await?;
                if existing == bytes {
                    debug!(path, "attachment already stored with identical content");
                    Ok(())
                } else {
                    Err(AttachmentError::Conflict(path.to_owned()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read an offloaded attachment back into its inline editor form.
    ///
    /// # Errors
    ///
    /// Returns `Storage(NotFound)` if the object is missing, or another
    /// storage error if the transfer fails.
    pub async fn resolve(&self, metadata: &AttachmentMetadata) -> Result<BinaryFile, AttachmentError> {
        let bytes = self.storage.download(&metadata.storage_path).await?;
        Ok(BinaryFile {
            id: metadata.id.clone(),
            mime_type: metadata.mime_type.clone(),
            data_url: encode_data_url(&metadata.mime_type, &bytes),
            created: metadata.created,
            last_retrieved: Some(now_ms()),
        })
    }

    /// Resolve every attachment of a document. Failures are logged and
    /// skipped so one missing file never blocks the rest of the page.
    pub async fn resolve_all(&self, files: &MetadataMap) -> (AttachmentMap, Vec<AttachmentFailure>) {
        let results = join_all(files.iter().map(|(id, metadata)| async move {
            (id.clone(), self.resolve(metadata).await)
        }))
        .await;

        let mut resolved = AttachmentMap::new();
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(file) => {
                    resolved.insert(id, file);
                }
                Err(error) => {
                    warn!(attachment_id = %id, error = %error, "attachment resolve failed; skipping");
                    failures.push(AttachmentFailure { id, error });
                }
            }
        }
        (resolved, failures)
    }
}

#[cfg(test)]
#[path = "offload_test.rs"]
mod tests;

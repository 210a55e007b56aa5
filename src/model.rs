//! Page document model.
//!
//! DESIGN
//! ======
//! Elements are opaque canvas values owned by the drawing library; this crate
//! only snapshots and compares them. Attachments exist in two shapes: the
//! inline `BinaryFile` the editor works with (payload as a data URL) and the
//! `AttachmentMetadata` persisted in the document once the payload has been
//! offloaded to object storage. Maps are `BTreeMap` so serialization is
//! deterministic and snapshots can be compared by value.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inline attachments keyed by attachment id.
pub type AttachmentMap = BTreeMap<String, BinaryFile>;

/// Offloaded attachment metadata keyed by attachment id.
pub type MetadataMap = BTreeMap<String, AttachmentMetadata>;

/// Current time as milliseconds since Unix epoch.
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// ELEMENTS
// =============================================================================

/// Ordered drawing elements as last seen in the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementSnapshot(Vec<serde_json::Value>);

impl ElementSnapshot {
    /// Deterministic serialization used for change detection.
    ///
    /// Object keys serialize in sorted order, so two snapshots with the same
    /// content always produce the same fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl std::ops::Deref for ElementSnapshot {
    type Target = [serde_json::Value];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<serde_json::Value>> for ElementSnapshot {
    fn from(elements: Vec<serde_json::Value>) -> Self {
        Self(elements)
    }
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// An attachment as held by the editor: payload inline as a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryFile {
    pub id: String,
    pub mime_type: String,
    #[serde(rename = "dataURL")]
    pub data_url: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub last_retrieved: Option<i64>,
}

/// Persisted reference to an offloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMetadata {
    pub id: String,
    #[serde(default)]
    pub created: i64,
    pub mime_type: String,
    /// `{owner_id}/{page_id}/{attachment_id}`; empty for legacy entries.
    #[serde(default)]
    pub storage_path: String,
    #[serde(default)]
    pub last_retrieved: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum DataUrlError {
    #[error("data URL is missing its payload separator")]
    Malformed,
    #[error("data URL is not base64 encoded")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encode raw bytes as a `data:<mime>;base64,<payload>` URL.
#[must_use]
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

/// Decode the payload of a base64 data URL.
///
/// # Errors
///
/// Returns an error if the URL has no `,` separator, is not base64 encoded,
/// or the payload is not valid base64.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, DataUrlError> {
    let Some((header, payload)) = data_url.split_once(',') else {
        return Err(DataUrlError::Malformed);
    };
    if !header.ends_with(";base64") {
        return Err(DataUrlError::NotBase64);
    }
    Ok(BASE64.decode(payload.trim())?)
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Canvas content persisted in the `page_elements` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    #[serde(default)]
    pub elements: ElementSnapshot,
    #[serde(default)]
    pub files: MetadataMap,
}

/// A persisted drawing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDocument {
    pub page_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub content: PageContent,
    pub updated_at: i64,
    pub is_deleted: bool,
}

/// Fields written by a save.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUpdate {
    pub name: String,
    pub content: PageContent,
    pub updated_at: i64,
}

// =============================================================================
// SCENE
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Scene push from the sync layer into the editor.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneUpdate {
    pub elements: ElementSnapshot,
    pub theme: Theme,
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;

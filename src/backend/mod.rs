//! Backend service contracts: document store, share store, identity, and
//! object storage.
//!
//! ARCHITECTURE
//! ============
//! The sync and sharing services only talk to these traits. Access control
//! lives behind them: a store answers "not found" for rows the caller may
//! not see, and the services never second-guess it. Postgres and the
//! in-memory backend implement the row stores; object storage has
//! filesystem, HTTP, and in-memory implementations in `storage` / `memory`.

pub mod memory;
pub mod postgres;
pub mod storage;

use std::fmt::Write;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::access::Permission;
use crate::model::{PageDocument, PageUpdate};

pub use storage::{ObjectStore, StorageError};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("not authenticated")]
    Auth,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Transfer(_) => "E_TRANSFER",
            Self::Auth => "E_AUTH",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transfer(_) | Self::Database(_))
    }
}

// =============================================================================
// ROWS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

/// An account with its stored password hash, for credential checks only.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub account: Account,
    pub password_hash: String,
}

/// A page as seen by a specific viewer.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub document: PageDocument,
    /// The viewer's share permission; `None` for the owner.
    pub shared_permission: Option<Permission>,
}

/// Lightweight page row for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRow {
    pub page_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareRecord {
    pub id: Uuid,
    pub page_id: Uuid,
    pub shared_by: Uuid,
    pub shared_with: Uuid,
    pub permission: Permission,
    pub created_at: i64,
}

/// A share record joined with the grantee's display identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareListing {
    #[serde(flatten)]
    pub share: ShareRecord,
    pub grantee_email: String,
    pub grantee_name: String,
}

// =============================================================================
// CONTRACTS
// =============================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a page the viewer owns or holds a share on. Soft-deleted pages
    /// are returned with `is_deleted` set; callers decide how to treat them.
    async fn fetch_page(&self, page_id: Uuid, viewer_id: Uuid) -> Result<Option<FetchedPage>, BackendError>;

    /// Write elements, attachment metadata, name, and timestamp. Edit access
    /// is checked before a scene ever reaches the sync layer, so this is a
    /// trusted write. Fails with `NotFound` for missing or deleted pages.
    async fn update_page(&self, page_id: Uuid, update: &PageUpdate) -> Result<(), BackendError>;

    async fn create_page(&self, owner_id: Uuid, name: &str) -> Result<PageDocument, BackendError>;

    /// Rename a page; the caller must own it or hold an `edit` share.
    async fn rename_page(&self, page_id: Uuid, caller_id: Uuid, name: &str) -> Result<(), BackendError>;

    /// Soft-delete a page; owner only.
    async fn soft_delete_page(&self, page_id: Uuid, caller_id: Uuid) -> Result<(), BackendError>;

    async fn list_owned_pages(&self, owner_id: Uuid) -> Result<Vec<PageRow>, BackendError>;

    /// Non-deleted pages shared with the user, with the user's permission.
    async fn list_shared_pages(&self, user_id: Uuid) -> Result<Vec<(PageRow, Permission)>, BackendError>;
}

#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Fails with `NotFound` unless the caller owns the page, and with
    /// `Conflict` if the grantee already holds a share on it.
    async fn insert_share(
        &self,
        caller_id: Uuid,
        page_id: Uuid,
        grantee_id: Uuid,
        permission: Permission,
    ) -> Result<ShareRecord, BackendError>;

    /// Shares on a page owned by the caller, oldest first.
    async fn list_shares(&self, caller_id: Uuid, page_id: Uuid) -> Result<Vec<ShareListing>, BackendError>;

    async fn update_share_permission(
        &self,
        caller_id: Uuid,
        share_id: Uuid,
        permission: Permission,
    ) -> Result<ShareRecord, BackendError>;

    async fn delete_share(&self, caller_id: Uuid, share_id: Uuid) -> Result<(), BackendError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a session token to its account; `None` for unknown or
    /// expired sessions.
    async fn account_for_token(&self, token: &str) -> Result<Option<Account>, BackendError>;

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, BackendError>;

    /// Register an account. Fails with `Conflict` when the email is taken,
    /// compared case-insensitively.
    async fn create_account(&self, email: &str, name: &str, password_hash: &str) -> Result<Account, BackendError>;

    /// `None` when no account matches or the account has no password.
    async fn credentials_for_email(&self, email: &str) -> Result<Option<Credentials>, BackendError>;

    /// Issue a new session token for the account.
    async fn create_session(&self, account_id: Uuid) -> Result<String, BackendError>;

    /// Deleting an unknown token is not an error.
    async fn delete_session(&self, token: &str) -> Result<(), BackendError>;

    /// Fails with `NotFound` for an unknown account and `Conflict` when the
    /// new email belongs to another account.
    async fn update_account(&self, account_id: Uuid, email: &str, name: &str) -> Result<Account, BackendError>;
}

// =============================================================================
// TOKENS
// =============================================================================

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex session token.
#[must_use]
pub(crate) fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

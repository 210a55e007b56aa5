//! Page sharing: grant, list, re-permission, and revoke share records.
//!
//! DESIGN
//! ======
//! Shares are addressed by share id once created. The service resolves the
//! grantee by email and translates backend errors; whether the caller owns
//! the page is decided by the share store, which answers "not found" for
//! pages the caller does not own.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::access::Permission;
use crate::backend::{BackendError, IdentityProvider, ShareListing, ShareRecord, ShareStore};
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("no account for {0}")]
    GranteeNotFound(String),
    #[error("cannot share a page with yourself")]
    SelfGrant,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already shared: {0}")]
    Conflict(String),
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for ShareError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(what) => Self::NotFound(what),
            BackendError::Conflict(what) => Self::Conflict(what),
            other => Self::Backend(other),
        }
    }
}

impl ErrorCode for ShareError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::GranteeNotFound(_) => "E_GRANTEE_NOT_FOUND",
            Self::SelfGrant => "E_SELF_GRANT",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

#[derive(Clone)]
pub struct ShareService {
    shares: Arc<dyn ShareStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl ShareService {
    #[must_use]
    pub fn new(shares: Arc<dyn ShareStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { shares, identity }
    }

    /// Share a page with the account registered under `grantee_email`.
    ///
    /// # Errors
    ///
    /// `GranteeNotFound` when no account matches; `SelfGrant` when the email
    /// is the caller's own; `Conflict` when the grantee already holds a
    /// share on the page; `NotFound` when the caller does not own the page.
    pub async fn grant(
        &self,
        caller_id: Uuid,
        page_id: Uuid,
        grantee_email: &str,
        permission: Permission,
    ) -> Result<ShareRecord, ShareError> {
        let email = grantee_email.trim();
        let grantee = self
            .identity
            .find_account_by_email(email)
            .await?
            .ok_or_else(|| ShareError::GranteeNotFound(email.to_owned()))?;
        if grantee.id == caller_id {
            return Err(ShareError::SelfGrant);
        }

        let record = self
            .shares
            .insert_share(caller_id, page_id, grantee.id, permission)
            .await?;
        info!(%page_id, share_id = %record.id, grantee = %grantee.id, permission = permission.as_str(), "page shared");
        Ok(record)
    }

    /// Shares of a page, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound` when the caller does not own the page.
    pub async fn list(&self, caller_id: Uuid, page_id: Uuid) -> Result<Vec<ShareListing>, ShareError> {
        Ok(self.shares.list_shares(caller_id, page_id).await?)
    }

    /// # Errors
    ///
    /// `NotFound` when the share is absent or on a page the caller does not own.
    pub async fn set_permission(
        &self,
        caller_id: Uuid,
        share_id: Uuid,
        permission: Permission,
    ) -> Result<ShareRecord, ShareError> {
        let record = self
            .shares
            .update_share_permission(caller_id, share_id, permission)
            .await?;
        info!(%share_id, permission = permission.as_str(), "share permission changed");
        Ok(record)
    }

    /// # Errors
    ///
    /// `NotFound` when the share is absent, including when it was already
    /// revoked.
    pub async fn revoke(&self, caller_id: Uuid, share_id: Uuid) -> Result<(), ShareError> {
        self.shares.delete_share(caller_id, share_id).await?;
        info!(%share_id, "share revoked");
        Ok(())
    }
}

#[cfg(test)]
#[path = "sharing_test.rs"]
mod tests;

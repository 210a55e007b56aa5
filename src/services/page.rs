//! Page service: dashboard listing, create, rename, delete, access checks.
//!
//! Thin layer over `DocumentStore`. Listings merge owned and shared pages
//! into one newest-first list tagged with the caller's `PageAccess`.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::access::PageAccess;
use crate::backend::{BackendError, DocumentStore, PageRow};
use crate::error::ErrorCode;
use crate::model::PageDocument;

const MAX_PAGE_NAME_LEN: usize = 200;
pub const DEFAULT_PAGE_NAME: &str = "Untitled";

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("page not found: {0}")]
    NotFound(Uuid),
    #[error("invalid page name")]
    InvalidName,
    #[error(transparent)]
    Backend(BackendError),
}

impl ErrorCode for PageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::InvalidName => "E_INVALID_NAME",
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

fn page_error(page_id: Uuid) -> impl FnOnce(BackendError) -> PageError {
    move |err| match err {
        BackendError::NotFound(_) => PageError::NotFound(page_id),
        other => PageError::Backend(other),
    }
}

/// A page as listed on the caller's dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub page_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub updated_at: i64,
    pub access: PageAccess,
}

impl PageSummary {
    fn from_row(row: PageRow, access: PageAccess) -> Self {
        Self { page_id: row.page_id, owner_id: row.owner_id, name: row.name, updated_at: row.updated_at, access }
    }
}

/// Trim and bound a page name. Empty names fall back to the default.
///
/// # Errors
///
/// `InvalidName` when the trimmed name is longer than the limit.
pub fn normalize_name(raw: Option<&str>) -> Result<String, PageError> {
    let name = raw.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Ok(DEFAULT_PAGE_NAME.to_owned());
    }
    if name.chars().count() > MAX_PAGE_NAME_LEN {
        return Err(PageError::InvalidName);
    }
    Ok(name.to_owned())
}

#[derive(Clone)]
pub struct PageService {
    store: Arc<dyn DocumentStore>,
}

impl PageService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Pages visible to `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error if either listing query fails.
    pub async fn list_pages(&self, user_id: Uuid, include_shared: bool) -> Result<Vec<PageSummary>, PageError> {
        let mut pages: Vec<PageSummary> = self
            .store
            .list_owned_pages(user_id)
            .await
            .map_err(PageError::Backend)?
            .into_iter()
            .map(|row| PageSummary::from_row(row, PageAccess::Owned))
            .collect();

        if include_shared {
            let shared = self
                .store
                .list_shared_pages(user_id)
                .await
                .map_err(PageError::Backend)?;
            pages.extend(shared.into_iter().filter_map(|(row, permission)| {
                let access = PageAccess::resolve(row.owner_id, user_id, Some(permission))?;
                Some(PageSummary::from_row(row, access))
            }));
        }

        pages.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.page_id.cmp(&b.page_id)));
        Ok(pages)
    }

    /// # Errors
    ///
    /// `InvalidName` for an over-long name, or a backend error.
    pub async fn create_page(&self, owner_id: Uuid, name: Option<&str>) -> Result<PageDocument, PageError> {
        let name = normalize_name(name)?;
        let doc = self
            .store
            .create_page(owner_id, &name)
            .await
            .map_err(PageError::Backend)?;
        info!(page_id = %doc.page_id, %owner_id, "page created");
        Ok(doc)
    }

    /// # Errors
    ///
    /// `NotFound` when the page is missing or the caller may not edit it.
    pub async fn rename_page(&self, caller_id: Uuid, page_id: Uuid, name: Option<&str>) -> Result<String, PageError> {
        let name = normalize_name(name)?;
        self.store
            .rename_page(page_id, caller_id, &name)
            .await
            .map_err(page_error(page_id))?;
        Ok(name)
    }

    /// Soft-delete a page.
    ///
    /// # Errors
    ///
    /// `NotFound` when the page is missing or not owned by the caller.
    pub async fn delete_page(&self, caller_id: Uuid, page_id: Uuid) -> Result<(), PageError> {
        self.store
            .soft_delete_page(page_id, caller_id)
            .await
            .map_err(page_error(page_id))?;
        info!(%page_id, "page deleted");
        Ok(())
    }

    /// The caller's access to a live page.
    ///
    /// # Errors
    ///
    /// `NotFound` when the page is missing, deleted, or not visible.
    pub async fn access_for(&self, viewer_id: Uuid, page_id: Uuid) -> Result<PageAccess, PageError> {
        let fetched = self
            .store
            .fetch_page(page_id, viewer_id)
            .await
            .map_err(page_error(page_id))?
            .filter(|f| !f.document.is_deleted)
            .ok_or(PageError::NotFound(page_id))?;
        PageAccess::resolve(fetched.document.owner_id, viewer_id, fetched.shared_permission)
            .ok_or(PageError::NotFound(page_id))
    }
}

#[cfg(test)]
#[path = "page_test.rs"]
mod tests;

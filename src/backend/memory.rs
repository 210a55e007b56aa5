//! In-memory backend for local development and tests.
//!
//! Mirrors the Postgres access rules (owner/share visibility, owner-only
//! share management, unique share per grantee) and adds write counters and
//! fault injection so sync behaviour can be asserted without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::storage::{ObjectStore, StorageError};
use super::{
    Account, BackendError, Credentials, DocumentStore, FetchedPage, IdentityProvider, PageRow, ShareListing,
    ShareRecord, ShareStore, generate_token,
};
use crate::access::Permission;
use crate::model::{PageContent, PageDocument, PageUpdate, now_ms};

// =============================================================================
// ROW STORE
// =============================================================================

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    passwords: HashMap<Uuid, String>,
    tokens: HashMap<String, Uuid>,
    pages: HashMap<Uuid, PageDocument>,
    shares: HashMap<Uuid, ShareRecord>,
}

impl MemoryState {
    fn share_for(&self, page_id: Uuid, user_id: Uuid) -> Option<&ShareRecord> {
        self.shares
            .values()
            .find(|s| s.page_id == page_id && s.shared_with == user_id)
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(email) && Some(a.id) != except)
    }

    fn owns(&self, page_id: Uuid, user_id: Uuid) -> bool {
        self.pages
            .get(&page_id)
            .is_some_and(|p| p.owner_id == user_id && !p.is_deleted)
    }
}

fn page_row(doc: &PageDocument) -> PageRow {
    PageRow { page_id: doc.page_id, owner_id: doc.owner_id, name: doc.name.clone(), updated_at: doc.updated_at }
}

/// Documents, shares, and accounts held in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    document_writes: AtomicUsize,
    fail_document_writes: AtomicBool,
    document_write_delay_ms: AtomicU64,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_account(&self, email: &str, name: &str) -> Account {
        let account = Account { id: Uuid::new_v4(), email: email.to_owned(), name: name.to_owned() };
        self.state
            .write()
            .await
            .accounts
            .insert(account.id, account.clone());
        account
    }

    /// Issue a session token for an existing account.
    pub async fn issue_token(&self, account_id: Uuid) -> String {
        let token = generate_token();
        self.state
            .write()
            .await
            .tokens
            .insert(token.clone(), account_id);
        token
    }

    pub async fn seed_page(&self, owner_id: Uuid, name: &str, content: PageContent) -> PageDocument {
        let doc = PageDocument {
            page_id: Uuid::new_v4(),
            owner_id,
            name: name.to_owned(),
            content,
            updated_at: now_ms(),
            is_deleted: false,
        };
        self.state
            .write()
            .await
            .pages
            .insert(doc.page_id, doc.clone());
        doc
    }
}

// Inspection and fault injection for tests.
#[cfg(test)]
impl MemoryBackend {
    /// Raw page lookup, bypassing access rules.
    pub async fn page(&self, page_id: Uuid) -> Option<PageDocument> {
        self.state.read().await.pages.get(&page_id).cloned()
    }

    pub async fn share_count(&self) -> usize {
        self.state.read().await.shares.len()
    }

    /// Number of successful `update_page` calls.
    pub fn document_writes(&self) -> usize {
        self.document_writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent `update_page` fail with a transfer error.
    pub fn set_fail_document_writes(&self, fail: bool) {
        self.fail_document_writes.store(fail, Ordering::SeqCst);
    }

    /// Stall every subsequent `update_page` before it writes.
    pub fn set_document_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.document_write_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.tokens.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn fetch_page(&self, page_id: Uuid, viewer_id: Uuid) -> Result<Option<FetchedPage>, BackendError> {
        let state = self.state.read().await;
        let Some(doc) = state.pages.get(&page_id) else {
            return Ok(None);
        };
        if doc.owner_id == viewer_id {
            return Ok(Some(FetchedPage { document: doc.clone(), shared_permission: None }));
        }
        Ok(state
            .share_for(page_id, viewer_id)
            .map(|share| FetchedPage { document: doc.clone(), shared_permission: Some(share.permission) }))
    }

    async fn update_page(&self, page_id: Uuid, update: &PageUpdate) -> Result<(), BackendError> {
        let delay = self.document_write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_document_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Transfer("injected document write failure".into()));
        }
        let mut state = self.state.write().await;
        let Some(doc) = state.pages.get_mut(&page_id).filter(|d| !d.is_deleted) else {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        };
        doc.name.clone_from(&update.name);
        doc.content = update.content.clone();
        doc.updated_at = update.updated_at;
        self.document_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_page(&self, owner_id: Uuid, name: &str) -> Result<PageDocument, BackendError> {
        Ok(self.seed_page(owner_id, name, PageContent::default()).await)
    }

    async fn rename_page(&self, page_id: Uuid, caller_id: Uuid, name: &str) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let can_edit = state.owns(page_id, caller_id)
            || state
                .share_for(page_id, caller_id)
                .is_some_and(|s| s.permission.satisfies(Permission::Edit));
        let Some(doc) = state
            .pages
            .get_mut(&page_id)
            .filter(|d| can_edit && !d.is_deleted)
        else {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        };
        doc.name = name.to_owned();
        doc.updated_at = now_ms();
        Ok(())
    }

    async fn soft_delete_page(&self, page_id: Uuid, caller_id: Uuid) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        if !state.owns(page_id, caller_id) {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }
        if let Some(doc) = state.pages.get_mut(&page_id) {
            doc.is_deleted = true;
        }
        Ok(())
    }

    async fn list_owned_pages(&self, owner_id: Uuid) -> Result<Vec<PageRow>, BackendError> {
        let state = self.state.read().await;
        let mut rows: Vec<PageRow> = state
            .pages
            .values()
            .filter(|d| d.owner_id == owner_id && !d.is_deleted)
            .map(page_row)
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn list_shared_pages(&self, user_id: Uuid) -> Result<Vec<(PageRow, Permission)>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .shares
            .values()
            .filter(|s| s.shared_with == user_id)
            .filter_map(|s| {
                let doc = state.pages.get(&s.page_id)?;
                (!doc.is_deleted).then(|| (page_row(doc), s.permission))
            })
            .collect())
    }
}

#[async_trait]
impl ShareStore for MemoryBackend {
    async fn insert_share(
        &self,
        caller_id: Uuid,
        page_id: Uuid,
        grantee_id: Uuid,
        permission: Permission,
    ) -> Result<ShareRecord, BackendError> {
        let mut state = self.state.write().await;
        if !state.owns(page_id, caller_id) {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }
        if state.share_for(page_id, grantee_id).is_some() {
            return Err(BackendError::Conflict(format!("page {page_id} already shared with {grantee_id}")));
        }
        let record = ShareRecord {
            id: Uuid::new_v4(),
            page_id,
            shared_by: caller_id,
            shared_with: grantee_id,
            permission,
            created_at: now_ms(),
        };
        state.shares.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_shares(&self, caller_id: Uuid, page_id: Uuid) -> Result<Vec<ShareListing>, BackendError> {
        let state = self.state.read().await;
        if !state.owns(page_id, caller_id) {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }
        let mut listings: Vec<ShareListing> = state
            .shares
            .values()
            .filter(|s| s.page_id == page_id)
            .map(|s| {
                let grantee = state.accounts.get(&s.shared_with);
                ShareListing {
                    share: s.clone(),
                    grantee_email: grantee.map(|a| a.email.clone()).unwrap_or_default(),
                    grantee_name: grantee.map(|a| a.name.clone()).unwrap_or_default(),
                }
            })
            .collect();
        listings.sort_by(|a, b| {
            a.share
                .created_at
                .cmp(&b.share.created_at)
                .then(a.share.id.cmp(&b.share.id))
        });
        Ok(listings)
    }

    async fn update_share_permission(
        &self,
        caller_id: Uuid,
        share_id: Uuid,
        permission: Permission,
    ) -> Result<ShareRecord, BackendError> {
        let mut state = self.state.write().await;
        let page_id = state.shares.get(&share_id).map(|s| s.page_id);
        let Some(page_id) = page_id.filter(|p| state.owns(*p, caller_id)) else {
            return Err(BackendError::NotFound(format!("share {share_id}")));
        };
        let Some(record) = state.shares.get_mut(&share_id) else {
            return Err(BackendError::NotFound(format!("share {share_id} on page {page_id}")));
        };
        record.permission = permission;
        Ok(record.clone())
    }

    async fn delete_share(&self, caller_id: Uuid, share_id: Uuid) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let owned = state
            .shares
            .get(&share_id)
            .is_some_and(|s| state.owns(s.page_id, caller_id));
        if !owned {
            return Err(BackendError::NotFound(format!("share {share_id}")));
        }
        state.shares.remove(&share_id);
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn account_for_token(&self, token: &str) -> Result<Option<Account>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .get(token)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_account(&self, email: &str, name: &str, password_hash: &str) -> Result<Account, BackendError> {
        let mut state = self.state.write().await;
        if state.email_taken(email, None) {
            return Err(BackendError::Conflict(format!("account {email}")));
        }
        let account = Account { id: Uuid::new_v4(), email: email.to_owned(), name: name.to_owned() };
        state.accounts.insert(account.id, account.clone());
        state.passwords.insert(account.id, password_hash.to_owned());
        Ok(account)
    }

    async fn credentials_for_email(&self, email: &str) -> Result<Option<Credentials>, BackendError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .and_then(|account| {
                let password_hash = state.passwords.get(&account.id)?.clone();
                Some(Credentials { account: account.clone(), password_hash })
            }))
    }

    async fn create_session(&self, account_id: Uuid) -> Result<String, BackendError> {
        if !self.state.read().await.accounts.contains_key(&account_id) {
            return Err(BackendError::NotFound(format!("account {account_id}")));
        }
        Ok(self.issue_token(account_id).await)
    }

    async fn delete_session(&self, token: &str) -> Result<(), BackendError> {
        self.state.write().await.tokens.remove(token);
        Ok(())
    }

    async fn update_account(&self, account_id: Uuid, email: &str, name: &str) -> Result<Account, BackendError> {
        let mut state = self.state.write().await;
        if state.email_taken(email, Some(account_id)) {
            return Err(BackendError::Conflict(format!("account {email}")));
        }
        let Some(account) = state.accounts.get_mut(&account_id) else {
            return Err(BackendError::NotFound(format!("account {account_id}")));
        };
        account.email = email.to_owned();
        account.name = name.to_owned();
        Ok(account.clone())
    }
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Object storage held in process memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    uploads: AtomicUsize,
    failing_uploads: RwLock<HashSet<String>>,
    failing_downloads: RwLock<HashSet<String>>,
    download_delay_ms: AtomicU64,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryObjectStore {
    /// Place an object directly, without counting it as an upload.
    pub async fn insert(&self, path: &str, bytes: &[u8], content_type: &str) {
        self.objects
            .write()
            .await
            .insert(path.to_owned(), (bytes.to_vec(), content_type.to_owned()));
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.objects.read().await.contains_key(path)
    }

    pub async fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|(_, ct)| ct.clone())
    }

    /// Number of upload attempts that reached the store, successful or not.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub async fn fail_upload(&self, path: &str) {
        self.failing_uploads.write().await.insert(path.to_owned());
    }

    pub async fn fail_download(&self, path: &str) {
        self.failing_downloads.write().await.insert(path.to_owned());
    }

    /// Stall every subsequent download.
    pub fn set_download_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.download_delay_ms.store(millis, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.failing_uploads.read().await.contains(path) {
            return Err(StorageError::Status { status: 503, body: "injected upload failure".into() });
        }
        let mut objects = self.objects.write().await;
        if objects.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_owned()));
        }
        objects.insert(path.to_owned(), (bytes.to_vec(), content_type.to_owned()));
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let delay = self.download_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing_downloads.read().await.contains(path) {
            return Err(StorageError::Status { status: 503, body: "injected download failure".into() });
        }
        self.objects
            .read()
            .await
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_owned()))
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;

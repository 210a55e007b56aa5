//! Sync coordinator: load and save of open pages against the backend.
//!
//! DESIGN
//! ======
//! Each open page has a `PageSession` holding the editor it syncs, the
//! document owner (for storage paths), and a single-flight mutex. Save takes
//! the mutex with `try_lock` and is dropped when another save or a load holds
//! it; load waits for the mutex so a save never reads a half-populated cache.
//! A flush (the final save on close) also waits instead of being dropped.
//! Different pages never share a lock.
//!
//! Save compares the editor against the `PageCache` entry written by the
//! last successful read or write. Unchanged state performs no remote writes,
//! so interval and manual saves can share one entry point.
//!
//! ERROR HANDLING
//! ==============
//! Attachment failures are isolated and reported in the outcome. Document
//! read/write failures abort the operation and leave the cache untouched;
//! there is no retry here, the next interval tick is the retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::PageAccess;
use crate::backend::{BackendError, DocumentStore};
use crate::editor::EditorHost;
use crate::error::ErrorCode;
use crate::model::{AttachmentMap, MetadataMap, PageContent, PageUpdate, SceneUpdate, Theme, now_ms};
use crate::services::cache::{CacheEntry, PageCache};
use crate::services::offload::{AttachmentOffloader, storage_path};

const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Period of the autosave loop for each open page.
    pub autosave_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { autosave_interval: Duration::from_millis(DEFAULT_AUTOSAVE_INTERVAL_MS) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("page not found: {0}")]
    NotFound(Uuid),
    #[error("page is not open: {0}")]
    NotOpen(Uuid),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::NotOpen(_) => "E_NOT_OPEN",
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.retryable(),
            Self::NotFound(_) | Self::NotOpen(_) => false,
        }
    }
}

/// Result of a successful load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPage {
    pub page_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub access: PageAccess,
    pub updated_at: i64,
    /// Attachments resolved into the editor.
    pub attachments: usize,
    /// Attachment ids that could not be resolved and were skipped.
    pub failed_attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    /// The document was written. `failed` attachments were left out and
    /// will be retried by the next save.
    Saved { uploaded: Vec<String>, failed: Vec<String> },
    /// Editor state matches the last sync; nothing was written.
    Unchanged,
    /// Another save or a load holds the page; this request was dropped.
    InFlight,
}

struct PageSession {
    owner_id: Uuid,
    name: RwLock<String>,
    editor: RwLock<Arc<dyn EditorHost>>,
    flight: Mutex<()>,
    saving: AtomicBool,
    open: AtomicBool,
}

/// Clears the saving flag when a save ends, however it ends.
struct SavingFlag<'a>(&'a AtomicBool);

impl<'a> SavingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SavingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// True when every editor attachment is already recorded in the cached
/// metadata at its derived path.
fn attachments_synced(owner_id: Uuid, page_id: Uuid, attachments: &AttachmentMap, synced: &MetadataMap) -> bool {
    attachments.keys().all(|id| {
        synced
            .get(id)
            .is_some_and(|meta| meta.storage_path == storage_path(owner_id, page_id, id))
    })
}

fn is_unchanged(entry: &CacheEntry, owner_id: Uuid, page_id: Uuid, name: &str, elements: &str, files: &AttachmentMap) -> bool {
    entry.name == name
        && entry.elements.fingerprint() == elements
        && attachments_synced(owner_id, page_id, files, &entry.files)
}

// =============================================================================
// COORDINATOR
// =============================================================================

pub struct SyncCoordinator {
    store: Arc<dyn DocumentStore>,
    offloader: AttachmentOffloader,
    cache: Arc<PageCache>,
    config: SyncConfig,
    sessions: RwLock<HashMap<Uuid, Arc<PageSession>>>,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        offloader: AttachmentOffloader,
        cache: Arc<PageCache>,
        config: SyncConfig,
    ) -> Self {
        Self { store, offloader, cache, config, sessions: RwLock::new(HashMap::new()) }
    }

    async fn session(&self, page_id: Uuid) -> Result<Arc<PageSession>, SyncError> {
        self.sessions
            .read()
            .await
            .get(&page_id)
            .cloned()
            .ok_or(SyncError::NotOpen(page_id))
    }

    /// Load a page into `editor` and open a sync session for it.
    ///
    /// # Errors
    ///
    /// `NotFound` when the page is missing, soft-deleted, or not visible to
    /// `viewer_id`; `Backend` when the document read fails.
    pub async fn load_page(
        &self,
        page_id: Uuid,
        viewer_id: Uuid,
        editor: Arc<dyn EditorHost>,
        theme: Theme,
    ) -> Result<LoadedPage, SyncError> {
        let fetched = self
            .store
            .fetch_page(page_id, viewer_id)
            .await?
            .ok_or(SyncError::NotFound(page_id))?;
        let doc = fetched.document;
        if doc.is_deleted {
            return Err(SyncError::NotFound(page_id));
        }
        let access = PageAccess::resolve(doc.owner_id, viewer_id, fetched.shared_permission)
            .ok_or(SyncError::NotFound(page_id))?;

        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(page_id)
                .or_insert_with(|| {
                    Arc::new(PageSession {
                        owner_id: doc.owner_id,
                        name: RwLock::new(doc.name.clone()),
                        editor: RwLock::new(Arc::clone(&editor)),
                        flight: Mutex::new(()),
                        saving: AtomicBool::new(false),
                        open: AtomicBool::new(true),
                    })
                })
                .clone()
        };

        // PHASE: POPULATE UNDER THE PAGE LOCK
        // WHY: a save reading the cache mid-load would diff against stale state.
        let _flight = session.flight.lock().await;
        *session.editor.write().await = Arc::clone(&editor);
        session.name.write().await.clone_from(&doc.name);

        let (files, failures) = self.offloader.resolve_all(&doc.content.files).await;
        let resolved = files.len();
        editor
            .update_scene(SceneUpdate { elements: doc.content.elements.clone(), theme })
            .await;
        editor.add_attachments(files).await;
        let element_count = doc.content.elements.len();
        self.cache
            .set(page_id, doc.content.elements, now_ms(), &doc.name, doc.content.files)
            .await;

        let failed_attachments: Vec<String> = failures.into_iter().map(|f| f.id).collect();
        info!(
            %page_id,
            %viewer_id,
            access = access.as_str(),
            elements = element_count,
            attachments = resolved,
            failed = failed_attachments.len(),
            "page loaded"
        );

        Ok(LoadedPage {
            page_id,
            owner_id: doc.owner_id,
            name: doc.name,
            access,
            updated_at: doc.updated_at,
            attachments: resolved,
            failed_attachments,
        })
    }

    /// Persist the editor state of an open page if it changed since the
    /// last sync.
    ///
    /// # Errors
    ///
    /// `NotOpen` when the page has no session; `Backend` when the document
    /// write fails, in which case the cache is left untouched.
    pub async fn save_page(&self, page_id: Uuid) -> Result<SaveOutcome, SyncError> {
        let session = self.session(page_id).await?;
        let Ok(_flight) = session.flight.try_lock() else {
            debug!(%page_id, "save dropped; page busy");
            return Ok(SaveOutcome::InFlight);
        };
        self.save_locked(page_id, &session).await
    }

    /// Like [`save_page`](Self::save_page), but waits for a running save or
    /// load to finish and then saves, so the result reflects the editor
    /// state at the time of the call. Never returns `InFlight`.
    ///
    /// # Errors
    ///
    /// `NotOpen` when the page has no session; `Backend` when the document
    /// write fails.
    pub async fn flush_page(&self, page_id: Uuid) -> Result<SaveOutcome, SyncError> {
        let session = self.session(page_id).await?;
        let _flight = session.flight.lock().await;
        debug!(%page_id, "flushing page");
        self.save_locked(page_id, &session).await
    }

    /// Save body; the caller holds `session.flight`.
    async fn save_locked(&self, page_id: Uuid, session: &PageSession) -> Result<SaveOutcome, SyncError> {
        let _saving = SavingFlag::raise(&session.saving);

        let editor = Arc::clone(&*session.editor.read().await);
        let elements = editor.elements().await;
        let attachments = editor.attachments().await;
        let name = session.name.read().await.clone();
        let owner_id = session.owner_id;

        let synced = self.cache.get(page_id).await;
        if let Some(entry) = &synced
            && is_unchanged(entry, owner_id, page_id, &name, &elements.fingerprint(), &attachments)
        {
            debug!(%page_id, last_synced = entry.synced_at, "save skipped; unchanged");
            return Ok(SaveOutcome::Unchanged);
        }

        let mut files = synced.map(|entry| entry.files).unwrap_or_default();
        let report = self
            .offloader
            .offload(owner_id, page_id, &attachments, &files)
            .await;
        files.extend(report.metadata);

        let update = PageUpdate {
            name: name.clone(),
            content: PageContent { elements: elements.clone(), files: files.clone() },
            updated_at: now_ms(),
        };
        if let Err(e) = self.store.update_page(page_id, &update).await {
            warn!(%page_id, error = %e, "page save failed");
            return Err(e.into());
        }
        self.cache
            .set(page_id, elements, update.updated_at, &name, files)
            .await;

        let retryable = report.failures.iter().all(|f| f.error.retryable());
        let failed: Vec<String> = report.failures.into_iter().map(|f| f.id).collect();
        info!(
            %page_id,
            uploaded = report.uploaded.len(),
            failed = failed.len(),
            failures_retryable = retryable,
            "page saved"
        );
        Ok(SaveOutcome::Saved { uploaded: report.uploaded, failed })
    }

    /// Whether a save is running for the page. Unknown pages are not saving.
    pub async fn is_saving(&self, page_id: Uuid) -> bool {
        self.sessions
            .read()
            .await
            .get(&page_id)
            .is_some_and(|s| s.saving.load(Ordering::SeqCst))
    }

    pub async fn is_open(&self, page_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&page_id)
    }

    /// Point an open page's session at a different editor. Waits for any
    /// running save or load so neither sees a half-switched session.
    ///
    /// # Errors
    ///
    /// `NotOpen` when the page has no session.
    pub async fn attach_editor(&self, page_id: Uuid, editor: Arc<dyn EditorHost>) -> Result<(), SyncError> {
        let session = self.session(page_id).await?;
        let _flight = session.flight.lock().await;
        *session.editor.write().await = editor;
        Ok(())
    }

    /// Set the name written by subsequent saves. No-op for pages that are
    /// not open.
    pub async fn rename_page(&self, page_id: Uuid, name: &str) {
        if let Ok(session) = self.session(page_id).await {
            *session.name.write().await = name.to_owned();
        }
    }

    /// End the session for a page. Interval saves stop at their next tick;
    /// a save already running completes.
    ///
    /// # Errors
    ///
    /// `NotOpen` when the page has no session.
    pub async fn close_page(&self, page_id: Uuid) -> Result<(), SyncError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&page_id)
            .ok_or(SyncError::NotOpen(page_id))?;
        session.open.store(false, Ordering::SeqCst);
        info!(%page_id, "page closed");
        Ok(())
    }

    /// Spawn the interval save loop for an open page. The loop ends once
    /// the session it was started for is closed.
    ///
    /// # Errors
    ///
    /// `NotOpen` when the page has no session.
    pub async fn spawn_autosave(self: &Arc<Self>, page_id: Uuid) -> Result<JoinHandle<()>, SyncError> {
        let session = self.session(page_id).await?;
        let coordinator = Arc::clone(self);
        let period = self.config.autosave_interval;
        info!(%page_id, interval = ?period, "autosave started");

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; the page was just loaded.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !session.open.load(Ordering::SeqCst) {
                    break;
                }
                match coordinator.save_page(page_id).await {
                    Ok(outcome) => debug!(%page_id, ?outcome, "autosave tick"),
                    Err(SyncError::NotOpen(_)) => break,
                    Err(e) => warn!(%page_id, error = %e, retryable = e.retryable(), "autosave failed"),
                }
            }
            info!(%page_id, "autosave stopped");
        }))
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;

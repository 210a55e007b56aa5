//! Live pages: open, push, and close of shared scene buffers.
//!
//! DESIGN
//! ======
//! A page opened by any client gets one `SceneBuffer`, loaded through the
//! sync coordinator and kept in `AppState::live` while any viewer has it
//! open. Later opens reuse the live scene instead of reloading it, so all
//! clients see one last-write-wins canvas. Scene pushes require edit access.
//!
//! ERROR HANDLING
//! ==============
//! On last-viewer close the page is flushed before eviction. If that flush
//! fails the page stays live with its autosave task running so the edits
//! are retried instead of lost.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::access::PageAccess;
use crate::editor::{Scene, SceneBuffer};
use crate::error::ErrorCode;
use crate::model::{AttachmentMap, ElementSnapshot, Theme};
use crate::services::page::PageError;
use crate::services::sync::{SaveOutcome, SyncError};
use crate::state::{AppState, LivePage};

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("page is not open: {0}")]
    NotOpen(Uuid),
    #[error("read-only access to page {0}")]
    ReadOnly(Uuid),
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl ErrorCode for LiveError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotOpen(_) => "E_NOT_OPEN",
            Self::ReadOnly(_) => "E_READ_ONLY",
            Self::Page(e) => e.error_code(),
            Self::Sync(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Page(e) => e.retryable(),
            Self::Sync(e) => e.retryable(),
            Self::NotOpen(_) | Self::ReadOnly(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenedPage {
    pub page_id: Uuid,
    pub access: PageAccess,
    /// True when the page was already live and its scene was reused.
    pub reused: bool,
    pub revision: u64,
    pub failed_attachments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageStatus {
    pub open: bool,
    pub saving: bool,
    pub revision: u64,
}

async fn live_scene(state: &AppState, page_id: Uuid) -> Result<Arc<SceneBuffer>, LiveError> {
    state
        .live
        .read()
        .await
        .get(&page_id)
        .map(|page| Arc::clone(&page.scene))
        .ok_or(LiveError::NotOpen(page_id))
}

async fn require_edit(state: &AppState, viewer_id: Uuid, page_id: Uuid) -> Result<(), LiveError> {
    let access = state.pages.access_for(viewer_id, page_id).await?;
    if !access.can_edit() {
        return Err(LiveError::ReadOnly(page_id));
    }
    Ok(())
}

/// Add `viewer_id` to an already-live page and describe its scene.
/// `None` when the page is not live.
async fn join_live(state: &AppState, viewer_id: Uuid, page_id: Uuid, access: PageAccess) -> Option<OpenedPage> {
    let mut live = state.live.write().await;
    let page = live.get_mut(&page_id)?;
    page.viewers.insert(viewer_id);
    let viewers = page.viewers.len();
    let scene = Arc::clone(&page.scene);
    drop(live);

    let revision = scene.snapshot().await.revision;
    info!(%page_id, %viewer_id, viewers, "joined live page");
    Some(OpenedPage { page_id, access, reused: true, revision, failed_attachments: Vec::new() })
}

/// Open a page for `viewer_id`, loading it if it is not live yet.
///
/// The live map is never locked across backend calls: a slow load of one
/// page does not hold up pushes to or opens of another. When two first opens
/// of the same page race, both load, the first to publish wins, and the
/// other joins its buffer.
///
/// # Errors
///
/// `Page(NotFound)` / `Sync(NotFound)` when the viewer cannot see the page.
pub async fn open_page(state: &AppState, viewer_id: Uuid, page_id: Uuid, theme: Theme) -> Result<OpenedPage, LiveError> {
    // PHASE: REUSE LIVE SCENE
    // WHY: every client of a page must edit the same buffer.
    if state.live.read().await.contains_key(&page_id) {
        let access = state.pages.access_for(viewer_id, page_id).await?;
        if let Some(opened) = join_live(state, viewer_id, page_id, access).await {
            return Ok(opened);
        }
    }

    // PHASE: LOAD WITHOUT THE LIVE LOCK
    let scene = Arc::new(SceneBuffer::new());
    let loaded = state
        .sync
        .load_page(page_id, viewer_id, scene.clone(), theme)
        .await?;

    // PHASE: PUBLISH OR JOIN
    let mut live = state.live.write().await;
    if let Some(page) = live.get_mut(&page_id) {
        page.viewers.insert(viewer_id);
        let winner = Arc::clone(&page.scene);
        drop(live);

        // The load above pointed the sync session at our scratch buffer.
        state.sync.attach_editor(page_id, winner.clone()).await?;
        let revision = winner.snapshot().await.revision;
        info!(%page_id, %viewer_id, "joined page loaded concurrently");
        return Ok(OpenedPage {
            page_id,
            access: loaded.access,
            reused: true,
            revision,
            failed_attachments: loaded.failed_attachments,
        });
    }
    let autosave = state.sync.spawn_autosave(page_id).await?;
    let revision = scene.snapshot().await.revision;
    live.insert(page_id, LivePage { scene, viewers: HashSet::from([viewer_id]), autosave });
    drop(live);
    info!(%page_id, %viewer_id, "page is live");

    Ok(OpenedPage {
        page_id,
        access: loaded.access,
        reused: false,
        revision,
        failed_attachments: loaded.failed_attachments,
    })
}

/// Current scene of a live page.
///
/// # Errors
///
/// `NotOpen` when the page is not live; `Page(NotFound)` when the viewer
/// cannot see it.
pub async fn scene(state: &AppState, viewer_id: Uuid, page_id: Uuid) -> Result<Scene, LiveError> {
    state.pages.access_for(viewer_id, page_id).await?;
    Ok(live_scene(state, page_id).await?.snapshot().await)
}

/// Replace the live scene's elements and merge any new files.
///
/// # Errors
///
/// `ReadOnly` for view-only access; `NotOpen` when the page is not live.
pub async fn push_scene(
    state: &AppState,
    viewer_id: Uuid,
    page_id: Uuid,
    elements: ElementSnapshot,
    files: Option<AttachmentMap>,
) -> Result<u64, LiveError> {
    require_edit(state, viewer_id, page_id).await?;
    let scene = live_scene(state, page_id).await?;
    Ok(scene.push(elements, files).await)
}

/// Save a live page now.
///
/// # Errors
///
/// `ReadOnly` for view-only access; `Sync` errors from the save itself.
pub async fn save_page(state: &AppState, viewer_id: Uuid, page_id: Uuid) -> Result<SaveOutcome, LiveError> {
    require_edit(state, viewer_id, page_id).await?;
    Ok(state.sync.save_page(page_id).await?)
}

/// # Errors
///
/// `Page(NotFound)` when the viewer cannot see the page.
pub async fn status(state: &AppState, viewer_id: Uuid, page_id: Uuid) -> Result<PageStatus, LiveError> {
    state.pages.access_for(viewer_id, page_id).await?;
    let revision = match live_scene(state, page_id).await {
        Ok(scene) => scene.snapshot().await.revision,
        Err(_) => 0,
    };
    Ok(PageStatus {
        open: state.sync.is_open(page_id).await,
        saving: state.sync.is_saving(page_id).await,
        revision,
    })
}

/// Close a page for `viewer_id`. The last viewer's close flushes and
/// evicts the page.
///
/// # Errors
///
/// `NotOpen` when the viewer does not have the page open; `Sync` when the
/// final flush fails, in which case the page stays live.
pub async fn close_page(state: &AppState, viewer_id: Uuid, page_id: Uuid) -> Result<(), LiveError> {
    let mut live = state.live.write().await;
    let Some(page) = live.get_mut(&page_id) else {
        return Err(LiveError::NotOpen(page_id));
    };
    if !page.viewers.remove(&viewer_id) {
        return Err(LiveError::NotOpen(page_id));
    }
    info!(%page_id, %viewer_id, remaining = page.viewers.len(), "viewer left page");
    if !page.viewers.is_empty() {
        return Ok(());
    }

    // Release lock before the final flush. The flush waits out a running
    // autosave rather than being dropped, so the last push is written.
    drop(live);
    let flush = state.sync.flush_page(page_id).await;

    // PHASE: EVICT OR RETAIN
    // WHY: evict only once the flush has succeeded and nobody rejoined.
    let mut live = state.live.write().await;
    let Some(page) = live.get(&page_id) else {
        return Ok(());
    };
    if !page.viewers.is_empty() {
        return Ok(());
    }
    if let Err(e) = flush {
        error!(%page_id, error = %e, "final flush failed; page retained for autosave retry");
        return Err(e.into());
    }

    live.remove(&page_id);
    state.sync.close_page(page_id).await?;
    info!(%page_id, "evicted page from memory");
    Ok(())
}

/// Drop a page's live state without flushing. Used once the page is deleted,
/// when any further save would fail anyway.
pub async fn discard(state: &AppState, page_id: Uuid) {
    let Some(page) = state.live.write().await.remove(&page_id) else {
        return;
    };
    page.autosave.abort();
    if state.sync.close_page(page_id).await.is_ok() {
        info!(%page_id, viewers = page.viewers.len(), "discarded live page");
    }
}

#[cfg(test)]
#[path = "live_test.rs"]
mod tests;

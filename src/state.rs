//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the backend handles, the services built on them, and a map of
//! live pages. Each live page has one scene buffer shared by every client
//! that opened it, the set of viewers, and its autosave task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{DocumentStore, IdentityProvider, ObjectStore, ShareStore};
use crate::editor::SceneBuffer;
use crate::services::auth::AuthService;
use crate::services::cache::PageCache;
use crate::services::offload::AttachmentOffloader;
use crate::services::page::PageService;
use crate::services::sharing::ShareService;
use crate::services::sync::{SyncConfig, SyncCoordinator};

// =============================================================================
// LIVE PAGE
// =============================================================================

/// Per-page live state. Kept in memory while any client has the page open;
/// flushed to the backend by the autosave task and on last close.
pub struct LivePage {
    pub scene: Arc<SceneBuffer>,
    /// Accounts that currently have the page open.
    pub viewers: HashSet<Uuid>,
    pub autosave: JoinHandle<()>,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Backend handles the state is assembled from.
pub struct Backends {
    pub documents: Arc<dyn DocumentStore>,
    pub shares: Arc<dyn ShareStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub objects: Arc<dyn ObjectStore>,
}

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityProvider>,
    pub auth: AuthService,
    pub pages: PageService,
    pub sharing: ShareService,
    pub sync: Arc<SyncCoordinator>,
    pub live: Arc<RwLock<HashMap<Uuid, LivePage>>>,
}

impl AppState {
    #[must_use]
    pub fn new(backends: Backends, sync_config: SyncConfig) -> Self {
        let sync = SyncCoordinator::new(
            Arc::clone(&backends.documents),
            AttachmentOffloader::new(backends.objects),
            Arc::new(PageCache::new()),
            sync_config,
        );
        Self {
            identity: Arc::clone(&backends.identity),
            auth: AuthService::new(Arc::clone(&backends.identity)),
            pages: PageService::new(Arc::clone(&backends.documents)),
            sharing: ShareService::new(backends.shares, backends.identity),
            sync: Arc::new(sync),
            live: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;

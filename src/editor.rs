//! Editor host contract and the server-side scene buffer.
//!
//! DESIGN
//! ======
//! The sync layer reads and writes canvas state only through `EditorHost`.
//! In this service the host is a `SceneBuffer`: the live scene of an open
//! page, fed by client pushes and read by the autosave loop.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::model::{AttachmentMap, ElementSnapshot, SceneUpdate, Theme};

#[async_trait]
pub trait EditorHost: Send + Sync {
    async fn elements(&self) -> ElementSnapshot;

    async fn attachments(&self) -> AttachmentMap;

    /// Replace the scene elements and apply the theme hint.
    async fn update_scene(&self, update: SceneUpdate);

    /// Merge attachments into the editor's file map.
    async fn add_attachments(&self, files: AttachmentMap);
}

/// Snapshot of a scene buffer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Scene {
    pub elements: ElementSnapshot,
    pub files: AttachmentMap,
    pub theme: Theme,
    /// Bumped on every mutation; lets clients detect stale reads.
    pub revision: u64,
}

/// In-memory editor host for an open page.
#[derive(Default)]
pub struct SceneBuffer {
    scene: RwLock<Scene>,
}

impl SceneBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Scene {
        self.scene.read().await.clone()
    }

    /// Apply a client push: elements are replaced, files are merged since
    /// the canvas never drops a file it has handed out.
    pub async fn push(&self, elements: ElementSnapshot, files: Option<AttachmentMap>) -> u64 {
        let mut scene = self.scene.write().await;
        scene.elements = elements;
        if let Some(files) = files {
            scene.files.extend(files);
        }
        scene.revision += 1;
        scene.revision
    }
}

#[async_trait]
impl EditorHost for SceneBuffer {
    async fn elements(&self) -> ElementSnapshot {
        self.scene.read().await.elements.clone()
    }

    async fn attachments(&self) -> AttachmentMap {
        self.scene.read().await.files.clone()
    }

    async fn update_scene(&self, update: SceneUpdate) {
        let mut scene = self.scene.write().await;
        scene.elements = update.elements;
        scene.theme = update.theme;
        scene.revision += 1;
    }

    async fn add_attachments(&self, files: AttachmentMap) {
        if files.is_empty() {
            return;
        }
        let mut scene = self.scene.write().await;
        scene.files.extend(files);
        scene.revision += 1;
    }
}

#[cfg(test)]
#[path = "editor_test.rs"]
mod tests;

//! Local page cache: last-synced state per page.
//!
//! DESIGN
//! ======
//! One cache per process, injected into the sync coordinator. Entries are
//! written only after a successful remote read or write, so an entry always
//! describes what the backend holds. No eviction: entries live as long as
//! the process. The map lock only keeps the map itself consistent; ordering
//! of writes for a single page is the coordinator's single-flight guard.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{ElementSnapshot, MetadataMap};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub elements: ElementSnapshot,
    pub files: MetadataMap,
    pub name: String,
    /// Milliseconds since epoch of the sync that produced this entry.
    pub synced_at: i64,
}

#[derive(Default)]
pub struct PageCache {
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
}

impl PageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, page_id: Uuid) -> Option<CacheEntry> {
        self.entries.read().await.get(&page_id).cloned()
    }

    pub async fn set(&self, page_id: Uuid, elements: ElementSnapshot, synced_at: i64, name: &str, files: MetadataMap) {
        self.entries
            .write()
            .await
            .insert(page_id, CacheEntry { elements, files, name: name.to_owned(), synced_at });
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;

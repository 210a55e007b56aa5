use super::*;
use crate::access::Permission;
use crate::backend::ShareStore;
use crate::backend::memory::{MemoryBackend, MemoryObjectStore};
use crate::editor::SceneBuffer;
use crate::model::{AttachmentMetadata, BinaryFile, ElementSnapshot, encode_data_url};
use serde_json::json;

struct Harness {
    backend: Arc<MemoryBackend>,
    objects: Arc<MemoryObjectStore>,
    cache: Arc<PageCache>,
    sync: Arc<SyncCoordinator>,
}

fn harness_with(config: SyncConfig) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let cache = Arc::new(PageCache::new());
    let sync = Arc::new(SyncCoordinator::new(
        backend.clone(),
        AttachmentOffloader::new(objects.clone()),
        cache.clone(),
        config,
    ));
    Harness { backend, objects, cache, sync }
}

fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

fn text(id: &str) -> serde_json::Value {
    json!({"id": id, "type": "text", "text": id})
}

fn file(id: &str, bytes: &[u8]) -> BinaryFile {
    BinaryFile {
        id: id.into(),
        mime_type: "image/png".into(),
        data_url: encode_data_url("image/png", bytes),
        created: 1,
        last_retrieved: None,
    }
}

fn metadata(owner: Uuid, page: Uuid, id: &str) -> AttachmentMetadata {
    AttachmentMetadata {
        id: id.into(),
        created: 1,
        mime_type: "image/png".into(),
        storage_path: storage_path(owner, page, id),
        last_retrieved: None,
    }
}

/// Seed an owner and an empty page, then load it into a fresh scene buffer.
async fn open_page(h: &Harness) -> (Uuid, Uuid, Arc<SceneBuffer>) {
    let owner = h.backend.seed_account("owner@x.test", "Owner").await;
    let page = h
        .backend
        .seed_page(owner.id, "Sketch", PageContent::default())
        .await;
    let scene = Arc::new(SceneBuffer::new());
    h.sync
        .load_page(page.page_id, owner.id, scene.clone(), Theme::Light)
        .await
        .unwrap();
    (owner.id, page.page_id, scene)
}

#[tokio::test]
async fn save_twice_writes_once() {
    let h = harness();
    let (_owner, page_id, scene) = open_page(&h).await;
    scene.push(vec![text("a")].into(), None).await;

    let first = h.sync.save_page(page_id).await.unwrap();
    assert!(matches!(first, SaveOutcome::Saved { .. }));
    assert_eq!(h.backend.document_writes(), 1);

    let second = h.sync.save_page(page_id).await.unwrap();
    assert_eq!(second, SaveOutcome::Unchanged);
    assert_eq!(h.backend.document_writes(), 1);
}

#[tokio::test]
async fn save_right_after_load_is_unchanged() {
    let h = harness();
    let (_owner, page_id, _scene) = open_page(&h).await;
    assert_eq!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::Unchanged);
    assert_eq!(h.backend.document_writes(), 0);
}

#[tokio::test]
async fn saved_attachment_is_never_uploaded_again() {
    let h = harness();
    let (owner, page_id, scene) = open_page(&h).await;
    let files = AttachmentMap::from([("fileA".to_owned(), file("fileA", b"png"))]);
    scene.push(vec![text("a")].into(), Some(files)).await;

    let outcome = h.sync.save_page(page_id).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved { uploaded: vec!["fileA".into()], failed: vec![] });
    assert_eq!(h.objects.upload_count(), 1);

    // Element change forces a document write; the attachment is reused.
    scene.push(vec![text("a"), text("b")].into(), None).await;
    let outcome = h.sync.save_page(page_id).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved { uploaded: vec![], failed: vec![] });
    assert_eq!(h.objects.upload_count(), 1);

    let stored = h.backend.page(page_id).await.unwrap();
    assert_eq!(stored.content.elements.len(), 2);
    assert_eq!(stored.content.files["fileA"].storage_path, storage_path(owner, page_id, "fileA"));
}

#[tokio::test]
async fn load_skips_unresolvable_attachment() {
    let h = harness();
    let owner = h.backend.seed_account("owner@x.test", "Owner").await;
    let seeded = h
        .backend
        .seed_page(owner.id, "Sketch", PageContent::default())
        .await;
    let page_id = seeded.page_id;
    let content = PageContent {
        elements: vec![text("hello")].into(),
        files: MetadataMap::from([
            ("f1".to_owned(), metadata(owner.id, page_id, "f1")),
            ("f2".to_owned(), metadata(owner.id, page_id, "f2")),
        ]),
    };
    h.backend
        .update_page(page_id, &PageUpdate { name: "Sketch".into(), content, updated_at: 5 })
        .await
        .unwrap();
    h.objects
        .insert(&storage_path(owner.id, page_id, "f1"), b"one", "image/png")
        .await;
    h.objects
        .insert(&storage_path(owner.id, page_id, "f2"), b"two", "image/png")
        .await;
    h.objects
        .fail_download(&storage_path(owner.id, page_id, "f2"))
        .await;

    let scene = Arc::new(SceneBuffer::new());
    let loaded = h
        .sync
        .load_page(page_id, owner.id, scene.clone(), Theme::Dark)
        .await
        .unwrap();

    assert_eq!(loaded.access, PageAccess::Owned);
    assert_eq!(loaded.attachments, 1);
    assert_eq!(loaded.failed_attachments, vec!["f2".to_owned()]);
    let snapshot = scene.snapshot().await;
    assert_eq!(&*snapshot.elements, &[text("hello")]);
    assert_eq!(snapshot.theme, Theme::Dark);
    assert!(snapshot.files.contains_key("f1"));
    assert!(!snapshot.files.contains_key("f2"));

    // The skipped attachment stays referenced by the document.
    let writes = h.backend.document_writes();
    assert_eq!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::Unchanged);
    assert_eq!(h.backend.document_writes(), writes);
}

#[tokio::test]
async fn load_populates_cache() {
    let h = harness();
    let (_owner, page_id, _scene) = open_page(&h).await;
    let entry = h.cache.get(page_id).await.unwrap();
    assert_eq!(entry.name, "Sketch");
    assert!(entry.elements.is_empty());
}

#[tokio::test]
async fn save_while_page_busy_is_dropped() {
    let h = harness();
    let (_owner, page_id, scene) = open_page(&h).await;
    scene.push(vec![text("a")].into(), None).await;

    let session = h.sync.session(page_id).await.unwrap();
    let guard = session.flight.lock().await;
    assert_eq!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::InFlight);
    assert_eq!(h.backend.document_writes(), 0);
    drop(guard);

    assert!(matches!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::Saved { .. }));
    assert!(!h.sync.is_saving(page_id).await);
}

#[tokio::test]
async fn failed_write_leaves_cache_untouched() {
    let h = harness();
    let (_owner, page_id, scene) = open_page(&h).await;
    let before = h.cache.get(page_id).await.unwrap();
    scene.push(vec![text("a")].into(), None).await;

    h.backend.set_fail_document_writes(true);
    let err = h.sync.save_page(page_id).await.unwrap_err();
    assert!(matches!(err, SyncError::Backend(BackendError::Transfer(_))));
    assert!(err.retryable());
    assert_eq!(h.cache.get(page_id).await.unwrap(), before);
    assert!(!h.sync.is_saving(page_id).await);

    h.backend.set_fail_document_writes(false);
    assert!(matches!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::Saved { .. }));
}

#[tokio::test]
async fn failed_upload_is_retried_by_next_save() {
    let h = harness();
    let (owner, page_id, scene) = open_page(&h).await;
    let path = storage_path(owner, page_id, "f1");
    h.objects.fail_upload(&path).await;
    scene
        .push(
            vec![text("a")].into(),
            Some(AttachmentMap::from([("f1".to_owned(), file("f1", b"png"))])),
        )
        .await;

    let outcome = h.sync.save_page(page_id).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved { uploaded: vec![], failed: vec!["f1".into()] });
    assert!(!h.backend.page(page_id).await.unwrap().content.files.contains_key("f1"));

    // Still failing: the save is attempted again instead of reported unchanged.
    let again = h.sync.save_page(page_id).await.unwrap();
    assert!(matches!(again, SaveOutcome::Saved { ref failed, .. } if failed == &vec!["f1".to_owned()]));
}

#[tokio::test]
async fn deleted_page_is_not_found() {
    let h = harness();
    let owner = h.backend.seed_account("owner@x.test", "Owner").await;
    let page = h
        .backend
        .seed_page(owner.id, "Sketch", PageContent::default())
        .await;
    h.backend
        .soft_delete_page(page.page_id, owner.id)
        .await
        .unwrap();

    let err = h
        .sync
        .load_page(page.page_id, owner.id, Arc::new(SceneBuffer::new()), Theme::Light)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(id) if id == page.page_id));
    assert!(!h.sync.is_open(page.page_id).await);
}

#[tokio::test]
async fn page_not_shared_with_viewer_is_not_found() {
    let h = harness();
    let owner = h.backend.seed_account("owner@x.test", "Owner").await;
    let stranger = h.backend.seed_account("stranger@x.test", "Stranger").await;
    let page = h
        .backend
        .seed_page(owner.id, "Sketch", PageContent::default())
        .await;

    let err = h
        .sync
        .load_page(page.page_id, stranger.id, Arc::new(SceneBuffer::new()), Theme::Light)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E_NOT_FOUND");
}

#[tokio::test]
async fn shared_editor_uploads_under_owner_path() {
    let h = harness();
    let owner = h.backend.seed_account("owner@x.test", "Owner").await;
    let guest = h.backend.seed_account("guest@x.test", "Guest").await;
    let page = h
        .backend
        .seed_page(owner.id, "Sketch", PageContent::default())
        .await;
    h.backend
        .insert_share(owner.id, page.page_id, guest.id, Permission::Edit)
        .await
        .unwrap();

    let scene = Arc::new(SceneBuffer::new());
    let loaded = h
        .sync
        .load_page(page.page_id, guest.id, scene.clone(), Theme::Light)
        .await
        .unwrap();
    assert_eq!(loaded.access, PageAccess::SharedEdit);

    scene
        .push(
            ElementSnapshot::default(),
            Some(AttachmentMap::from([("f1".to_owned(), file("f1", b"png"))])),
        )
        .await;
    h.sync.save_page(page.page_id).await.unwrap();
    assert!(h.objects.contains(&format!("{}/{}/f1", owner.id, page.page_id)).await);
    assert!(!h.objects.contains(&format!("{}/{}/f1", guest.id, page.page_id)).await);
}

#[tokio::test]
async fn rename_is_written_by_next_save() {
    let h = harness();
    let (_owner, page_id, _scene) = open_page(&h).await;
    h.sync.rename_page(page_id, "Renamed").await;

    assert!(matches!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::Saved { .. }));
    assert_eq!(h.backend.page(page_id).await.unwrap().name, "Renamed");
}

#[tokio::test]
async fn save_on_unopened_page_is_not_open() {
    let h = harness();
    let err = h.sync.save_page(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SyncError::NotOpen(_)));
}

#[tokio::test]
async fn close_ends_session() {
    let h = harness();
    let (_owner, page_id, _scene) = open_page(&h).await;
    h.sync.close_page(page_id).await.unwrap();

    assert!(!h.sync.is_open(page_id).await);
    assert!(matches!(h.sync.save_page(page_id).await, Err(SyncError::NotOpen(_))));
    assert!(matches!(h.sync.close_page(page_id).await, Err(SyncError::NotOpen(_))));
}

#[tokio::test]
async fn autosave_persists_changes_and_stops_after_close() {
    let h = harness_with(SyncConfig { autosave_interval: Duration::from_millis(10) });
    let (_owner, page_id, scene) = open_page(&h).await;
    let handle = h.sync.spawn_autosave(page_id).await.unwrap();

    scene.push(vec![text("a")].into(), None).await;
    for _ in 0..100 {
        if h.backend.document_writes() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.backend.document_writes(), 1);

    h.sync.close_page(page_id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("autosave loop should stop after close")
        .unwrap();

    scene.push(vec![text("b")].into(), None).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.backend.document_writes(), 1);
}

#[tokio::test]
async fn spawn_autosave_requires_open_page() {
    let h = harness();
    assert!(matches!(h.sync.spawn_autosave(Uuid::new_v4()).await, Err(SyncError::NotOpen(_))));
}

#[tokio::test]
async fn saving_flag_is_raised_while_write_is_stalled() {
    let h = harness();
    let (_owner, page_id, scene) = open_page(&h).await;
    scene.push(vec![text("a")].into(), None).await;
    h.backend.set_document_write_delay(Duration::from_millis(300));

    let sync = h.sync.clone();
    let save = tokio::spawn(async move { sync.save_page(page_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.sync.is_saving(page_id).await);
    assert_eq!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::InFlight);

    assert!(matches!(save.await.unwrap().unwrap(), SaveOutcome::Saved { .. }));
    assert!(!h.sync.is_saving(page_id).await);
}

#[tokio::test]
async fn flush_waits_for_running_save_and_writes_latest_state() {
    let h = harness();
    let (_owner, page_id, scene) = open_page(&h).await;
    scene.push(vec![text("a")].into(), None).await;
    h.backend.set_document_write_delay(Duration::from_millis(200));

    let sync = h.sync.clone();
    let save = tokio::spawn(async move { sync.save_page(page_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    scene.push(vec![text("a"), text("b")].into(), None).await;

    assert!(matches!(h.sync.flush_page(page_id).await.unwrap(), SaveOutcome::Saved { .. }));
    assert!(matches!(save.await.unwrap().unwrap(), SaveOutcome::Saved { .. }));
    assert_eq!(h.backend.document_writes(), 2);
    assert_eq!(h.backend.page(page_id).await.unwrap().content.elements.len(), 2);
}

#[tokio::test]
async fn flush_of_unchanged_page_writes_nothing() {
    let h = harness();
    let (_owner, page_id, _scene) = open_page(&h).await;
    assert_eq!(h.sync.flush_page(page_id).await.unwrap(), SaveOutcome::Unchanged);
    assert_eq!(h.backend.document_writes(), 0);
    assert!(matches!(h.sync.flush_page(Uuid::new_v4()).await, Err(SyncError::NotOpen(_))));
}

#[tokio::test]
async fn attached_editor_is_what_the_next_save_reads() {
    let h = harness();
    let (_owner, page_id, loaded) = open_page(&h).await;
    let other = Arc::new(SceneBuffer::new());
    other.push(vec![text("x"), text("y")].into(), None).await;

    h.sync.attach_editor(page_id, other.clone()).await.unwrap();
    loaded.push(vec![text("ignored")].into(), None).await;

    assert!(matches!(h.sync.save_page(page_id).await.unwrap(), SaveOutcome::Saved { .. }));
    assert_eq!(&*h.backend.page(page_id).await.unwrap().content.elements, &[text("x"), text("y")]);
    assert!(matches!(
        h.sync.attach_editor(Uuid::new_v4(), other).await,
        Err(SyncError::NotOpen(_))
    ));
}

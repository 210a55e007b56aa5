//! Page routes: dashboard CRUD and the live scene of open pages.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::editor::Scene;
use crate::model::{AttachmentMap, ElementSnapshot, Theme};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiError, backend_error_to_status};
use crate::services::live::{self, LiveError, OpenedPage, PageStatus};
use crate::services::page::{PageError, PageSummary};
use crate::services::sync::{SaveOutcome, SyncError};
use crate::state::AppState;

// =============================================================================
// ERROR MAPPING
// =============================================================================

pub(crate) fn page_error_to_status(err: &PageError) -> StatusCode {
    match err {
        PageError::NotFound(_) => StatusCode::NOT_FOUND,
        PageError::InvalidName => StatusCode::BAD_REQUEST,
        PageError::Backend(e) => backend_error_to_status(e),
    }
}

pub(crate) fn sync_error_to_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::NotOpen(_) => StatusCode::CONFLICT,
        SyncError::Backend(e) => backend_error_to_status(e),
    }
}

pub(crate) fn live_error_to_status(err: &LiveError) -> StatusCode {
    match err {
        LiveError::NotOpen(_) => StatusCode::CONFLICT,
        LiveError::ReadOnly(_) => StatusCode::FORBIDDEN,
        LiveError::Page(e) => page_error_to_status(e),
        LiveError::Sync(e) => sync_error_to_status(e),
    }
}

impl From<PageError> for ApiError {
    fn from(err: PageError) -> Self {
        Self::from_error(page_error_to_status(&err), &err)
    }
}

impl From<LiveError> for ApiError {
    fn from(err: LiveError) -> Self {
        Self::from_error(live_error_to_status(&err), &err)
    }
}

// =============================================================================
// DASHBOARD
// =============================================================================

#[derive(Deserialize)]
pub struct ListPagesQuery {
    pub include_shared: Option<bool>,
}

#[derive(Deserialize)]
pub struct PageNameBody {
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub page_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub updated_at: i64,
}

/// `GET /api/pages`: owned and shared pages, newest first.
pub async fn list_pages(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListPagesQuery>,
) -> Result<Json<Vec<PageSummary>>, ApiError> {
    let pages = state
        .pages
        .list_pages(auth.account.id, query.include_shared.unwrap_or(true))
        .await?;
    Ok(Json(pages))
}

/// `POST /api/pages`: create an empty page.
pub async fn create_page(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<PageNameBody>,
) -> Result<(StatusCode, Json<PageResponse>), ApiError> {
    let doc = state
        .pages
        .create_page(auth.account.id, body.name.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PageResponse { page_id: doc.page_id, owner_id: doc.owner_id, name: doc.name, updated_at: doc.updated_at }),
    ))
}

/// `PATCH /api/pages/:id`: rename a page.
pub async fn rename_page(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
    Json(body): Json<PageNameBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = state
        .pages
        .rename_page(auth.account.id, page_id, body.name.as_deref())
        .await?;
    state.sync.rename_page(page_id, &name).await;
    Ok(Json(serde_json::json!({ "ok": true, "name": name })))
}

/// `DELETE /api/pages/:id`: soft-delete a page and drop its live state.
pub async fn delete_page(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.pages.delete_page(auth.account.id, page_id).await?;
    live::discard(&state, page_id).await;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// LIVE PAGE
// =============================================================================

#[derive(Deserialize)]
pub struct OpenPageQuery {
    pub theme: Option<Theme>,
}

#[derive(Deserialize)]
pub struct ScenePushBody {
    pub elements: ElementSnapshot,
    #[serde(default)]
    pub files: Option<AttachmentMap>,
}

#[derive(Debug, Serialize)]
pub struct ScenePushResponse {
    pub revision: u64,
}

/// `POST /api/pages/:id/open`: load a page or join its live scene.
pub async fn open_page(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
    Query(query): Query<OpenPageQuery>,
) -> Result<Json<OpenedPage>, ApiError> {
    let opened = live::open_page(&state, auth.account.id, page_id, query.theme.unwrap_or_default()).await?;
    Ok(Json(opened))
}

/// `GET /api/pages/:id/scene`: current live scene.
pub async fn get_scene(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
) -> Result<Json<Scene>, ApiError> {
    Ok(Json(live::scene(&state, auth.account.id, page_id).await?))
}

/// `PUT /api/pages/:id/scene`: replace elements, merge files.
pub async fn put_scene(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
    Json(body): Json<ScenePushBody>,
) -> Result<Json<ScenePushResponse>, ApiError> {
    let revision = live::push_scene(&state, auth.account.id, page_id, body.elements, body.files).await?;
    Ok(Json(ScenePushResponse { revision }))
}

/// `POST /api/pages/:id/save`: save now.
pub async fn save_page(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
) -> Result<Json<SaveOutcome>, ApiError> {
    Ok(Json(live::save_page(&state, auth.account.id, page_id).await?))
}

/// `GET /api/pages/:id/status`: open/saving flags for UI disablement.
pub async fn page_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
) -> Result<Json<PageStatus>, ApiError> {
    Ok(Json(live::status(&state, auth.account.id, page_id).await?))
}

/// `POST /api/pages/:id/close`: leave the page; the last viewer flushes it.
pub async fn close_page(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    live::close_page(&state, auth.account.id, page_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "pages_test.rs"]
mod tests;

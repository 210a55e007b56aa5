//! Share management routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::Permission;
use crate::backend::{ShareListing, ShareRecord};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiError, backend_error_to_status};
use crate::services::sharing::ShareError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct GrantShareBody {
    pub email: String,
    pub permission: String,
}

#[derive(Deserialize)]
pub struct UpdateShareBody {
    pub permission: String,
}

pub(crate) fn share_error_to_status(err: &ShareError) -> StatusCode {
    match err {
        ShareError::GranteeNotFound(_) | ShareError::NotFound(_) => StatusCode::NOT_FOUND,
        ShareError::Conflict(_) => StatusCode::CONFLICT,
        ShareError::SelfGrant => StatusCode::BAD_REQUEST,
        ShareError::Backend(e) => backend_error_to_status(e),
    }
}

impl From<ShareError> for ApiError {
    fn from(err: ShareError) -> Self {
        Self::from_error(share_error_to_status(&err), &err)
    }
}

fn parse_permission(raw: &str) -> Result<Permission, ApiError> {
    Permission::parse(raw.trim()).ok_or_else(|| ApiError::bad_request(format!("unknown permission: {raw}")))
}

/// `GET /api/pages/:id/shares`: list a page's shares.
pub async fn list_shares(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
) -> Result<Json<Vec<ShareListing>>, ApiError> {
    Ok(Json(state.sharing.list(auth.account.id, page_id).await?))
}

/// `POST /api/pages/:id/shares`: share a page with an account by email.
pub async fn grant_share(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(page_id): Path<Uuid>,
    Json(body): Json<GrantShareBody>,
) -> Result<(StatusCode, Json<ShareRecord>), ApiError> {
    let permission = parse_permission(&body.permission)?;
    let record = state
        .sharing
        .grant(auth.account.id, page_id, &body.email, permission)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PATCH /api/shares/:share_id`: change a share's permission.
pub async fn update_share(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(share_id): Path<Uuid>,
    Json(body): Json<UpdateShareBody>,
) -> Result<Json<ShareRecord>, ApiError> {
    let permission = parse_permission(&body.permission)?;
    let record = state
        .sharing
        .set_permission(auth.account.id, share_id, permission)
        .await?;
    Ok(Json(record))
}

/// `DELETE /api/shares/:share_id`: revoke a share.
pub async fn revoke_share(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(share_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sharing.revoke(auth.account.id, share_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "shares_test.rs"]
mod tests;

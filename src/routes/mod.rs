//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the JSON API under a single Axum router. Handlers stay
//! thin: authenticate, call a service, and translate service errors into
//! HTTP statuses with an `E_*` code body.

pub mod auth;
pub mod pages;
pub mod shares;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backend::BackendError;
use crate::error::ErrorCode;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

/// JSON error response: `{"error", "code", "retryable"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn from_error<E: ErrorCode>(status: StatusCode, err: &E) -> Self {
        Self { status, code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "E_BAD_REQUEST", message: message.into(), retryable: false }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "request failed");
        }
        let body = serde_json::json!({
            "error": self.message,
            "code": self.code,
            "retryable": self.retryable,
        });
        (self.status, Json(body)).into_response()
    }
}

pub(crate) fn backend_error_to_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::NotFound(_) => StatusCode::NOT_FOUND,
        BackendError::Conflict(_) => StatusCode::CONFLICT,
        BackendError::Auth => StatusCode::UNAUTHORIZED,
        BackendError::Transfer(_) => StatusCode::BAD_GATEWAY,
        BackendError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the router. `max_body_bytes` replaces Axum's 2 MiB default so scene
/// pushes with inline attachments fit.
pub fn app(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/signup", post(auth::sign_up))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me).patch(auth::update_me))
        .route("/api/pages", get(pages::list_pages).post(pages::create_page))
        .route("/api/pages/{id}", patch(pages::rename_page).delete(pages::delete_page))
        .route("/api/pages/{id}/open", post(pages::open_page))
        .route("/api/pages/{id}/scene", get(pages::get_scene).put(pages::put_scene))
        .route("/api/pages/{id}/save", post(pages::save_page))
        .route("/api/pages/{id}/status", get(pages::page_status))
        .route("/api/pages/{id}/close", post(pages::close_page))
        .route("/api/pages/{id}/shares", get(shares::list_shares).post(shares::grant_share))
        .route(
            "/api/shares/{share_id}",
            patch(shares::update_share).delete(shares::revoke_share),
        )
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

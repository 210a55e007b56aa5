//! Auth routes: bearer-token extractor, sign-up, login, logout, and the
//! current account.

use axum::extract::{FromRef, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::Deserialize;
use tracing::warn;

use crate::backend::{Account, IdentityProvider};
use crate::routes::{ApiError, backend_error_to_status};
use crate::services::auth::{AuthError, AuthSession};
use crate::state::AppState;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated account extracted from the `Authorization: Bearer` header.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub account: Account,
    pub token: String,
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;

        let app_state = AppState::from_ref(state);
        let account = app_state
            .identity
            .account_for_token(token)
            .await
            .map_err(|e| {
                warn!(error = %e, "session lookup failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self { account, token: token.to_owned() })
    }
}

// =============================================================================
// ERRORS
// =============================================================================

pub(crate) fn auth_error_to_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AuthError::EmailTaken(_) => StatusCode::CONFLICT,
        AuthError::AccountNotFound => StatusCode::NOT_FOUND,
        AuthError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::Backend(e) => backend_error_to_status(e),
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::from_error(auth_error_to_status(&err), &err)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize)]
pub struct SignUpBody {
    pub name: Option<String>,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateMeBody {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// `POST /api/auth/signup`: register and return a session token.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(body): Json<SignUpBody>,
) -> Result<(StatusCode, Json<AuthSession>), ApiError> {
    let session = state
        .auth
        .sign_up(body.name.as_deref(), &body.email, &body.password)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// `POST /api/auth/login`: exchange email and password for a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<AuthSession>, ApiError> {
    Ok(Json(state.auth.login(&body.email, &body.password).await?))
}

/// `POST /api/auth/logout`: revoke the presented token.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<StatusCode, ApiError> {
    state.auth.logout(&auth.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/auth/me`: return current account.
pub async fn me(auth: AuthUser) -> Json<Account> {
    Json(auth.account)
}

/// `PATCH /api/auth/me`: change display name and/or email.
pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdateMeBody>,
) -> Result<Json<Account>, ApiError> {
    let account = state
        .auth
        .update_profile(&auth.account, body.name.as_deref(), body.email.as_deref())
        .await?;
    Ok(Json(account))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

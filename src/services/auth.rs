//! Account service: sign-up, password login, logout, and profile updates.
//!
//! DESIGN
//! ======
//! Passwords are stored as Argon2id PHC strings, so the hash carries its own
//! salt and cost parameters. Hashing and verification are CPU bound and run
//! on the blocking pool. Sessions are opaque bearer tokens issued by the
//! identity provider; logout deletes the presented token and nothing else.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::Serialize;
use tracing::info;

use crate::backend::{Account, BackendError, IdentityProvider};
use crate::error::ErrorCode;

pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid {0}")]
    InvalidInput(&'static str),
    #[error("email already registered: {0}")]
    EmailTaken(String),
    #[error("account not found")]
    AccountNotFound,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Backend(BackendError),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::EmailTaken(_) => "E_EMAIL_TAKEN",
            Self::AccountNotFound => "E_NOT_FOUND",
            Self::Hash(_) => "E_HASH",
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

/// A freshly issued session: the account plus its bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub account: Account,
    pub token: String,
}

// =============================================================================
// INPUT NORMALIZATION
// =============================================================================

/// Trim and lowercase an email; `None` unless it has exactly one `@` with
/// text on both sides and no whitespace.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || normalized.contains(char::is_whitespace) {
        return None;
    }
    Some(normalized)
}

fn normalize_name(name: &str) -> Result<String, AuthError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AuthError::InvalidInput("name"));
    }
    Ok(trimmed.to_owned())
}

/// Display name for a sign-up without one: the email's local part.
fn name_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("user")
        .to_owned()
}

// =============================================================================
// SERVICE
// =============================================================================

#[derive(Clone)]
pub struct AuthService {
    identity: Arc<dyn IdentityProvider>,
    params: Params,
}

impl AuthService {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity, params: Params::default() }
    }

    /// Low-cost hashing parameters, so tests are not dominated by Argon2.
    #[cfg(test)]
    #[must_use]
    pub fn with_params(identity: Arc<dyn IdentityProvider>, params: Params) -> Self {
        Self { identity, params }
    }

    /// Register a new account and open its first session.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed email, name, or a password shorter
    /// than [`MIN_PASSWORD_LEN`]; `EmailTaken` when the address is already
    /// registered, compared case-insensitively.
    pub async fn sign_up(&self, name: Option<&str>, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email).ok_or(AuthError::InvalidInput("email"))?;
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => normalize_name(name)?,
            None => name_from_email(&email),
        };
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput("password"));
        }

        let password_hash = hash_password(self.params.clone(), password.to_owned()).await?;
        let account = self
            .identity
            .create_account(&email, &name, &password_hash)
            .await
            .map_err(|e| match e {
                BackendError::Conflict(_) => AuthError::EmailTaken(email.clone()),
                other => AuthError::Backend(other),
            })?;
        let token = self.identity.create_session(account.id).await.map_err(AuthError::Backend)?;

        info!(account_id = %account.id, "account registered");
        Ok(AuthSession { account, token })
    }

    /// Check an email and password and open a new session.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for an unknown email, an account without a
    /// password, or a wrong password. The three are not distinguished.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email).ok_or(AuthError::InvalidCredentials)?;
        let credentials = self
            .identity
            .credentials_for_email(&email)
            .await
            .map_err(AuthError::Backend)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password.to_owned(), credentials.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let account = credentials.account;
        let token = self.identity.create_session(account.id).await.map_err(AuthError::Backend)?;
        info!(account_id = %account.id, "session opened");
        Ok(AuthSession { account, token })
    }

    /// Revoke one session token. Other sessions of the account stay valid.
    ///
    /// # Errors
    ///
    /// Backend failures only; an unknown token is not an error.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.identity.delete_session(token).await.map_err(AuthError::Backend)
    }

    /// Change the display name and/or email. Fields left `None` keep their
    /// current value.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed field; `EmailTaken` when another
    /// account holds the new address; `AccountNotFound` when the account is
    /// gone.
    pub async fn update_profile(
        &self,
        current: &Account,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Account, AuthError> {
        let name = match name {
            Some(name) => normalize_name(name)?,
            None => current.name.clone(),
        };
        let email = match email {
            Some(email) => normalize_email(email).ok_or(AuthError::InvalidInput("email"))?,
            None => current.email.clone(),
        };

        let account = self
            .identity
            .update_account(current.id, &email, &name)
            .await
            .map_err(|e| match e {
                BackendError::Conflict(_) => AuthError::EmailTaken(email.clone()),
                BackendError::NotFound(_) => AuthError::AccountNotFound,
                other => AuthError::Backend(other),
            })?;

        info!(account_id = %account.id, "profile updated");
        Ok(account)
    }
}

// =============================================================================
// PASSWORD HASHING
// =============================================================================

async fn hash_password(params: Params, password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| AuthError::Hash(e.to_string()))?
    .map_err(|e| AuthError::Hash(e.to_string()))
}

/// `Ok(false)` on a mismatch; `Err` only when the stored hash is unreadable.
async fn verify_password(password: String, stored: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored)?;
        // Cost parameters are taken from the stored hash.
        Ok::<_, argon2::password_hash::Error>(
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
        )
    })
    .await
    .map_err(|e| AuthError::Hash(e.to_string()))?
    .map_err(|e| AuthError::Hash(e.to_string()))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

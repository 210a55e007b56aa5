//! Postgres implementation of the document, share, and identity stores.
//!
//! DESIGN
//! ======
//! Access rules are expressed in the SQL itself: every read and mutation
//! joins against page ownership or the caller's share, so a row the caller
//! may not touch simply does not match and surfaces as `NotFound`.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    Account, BackendError, Credentials, DocumentStore, FetchedPage, IdentityProvider, PageRow, ShareListing,
    ShareRecord, ShareStore, generate_token,
};
use crate::access::Permission;
use crate::model::{PageContent, PageDocument, PageUpdate, now_ms};

type ShareTuple = (Uuid, Uuid, Uuid, Uuid, String, i64);

#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_permission(raw: &str) -> Result<Permission, BackendError> {
    Permission::parse(raw).ok_or_else(|| BackendError::Transfer(format!("unknown permission {raw:?}")))
}

fn parse_content(page_id: Uuid, raw: serde_json::Value) -> Result<PageContent, BackendError> {
    serde_json::from_value(raw).map_err(|e| BackendError::Transfer(format!("malformed page_elements for {page_id}: {e}")))
}

/// Map a unique-constraint violation to `Conflict`; anything else stays a
/// database error.
fn unique_conflict(err: sqlx::Error, what: String) -> BackendError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => BackendError::Conflict(what),
        _ => err.into(),
    }
}

fn share_from_tuple(row: ShareTuple) -> Result<ShareRecord, BackendError> {
    let (id, page_id, shared_by, shared_with, permission, created_at) = row;
    Ok(ShareRecord { id, page_id, shared_by, shared_with, permission: parse_permission(&permission)?, created_at })
}

#[async_trait]
impl DocumentStore for PgBackend {
    async fn fetch_page(&self, page_id: Uuid, viewer_id: Uuid) -> Result<Option<FetchedPage>, BackendError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, serde_json::Value, i64, bool, Option<String>)>(
            "SELECT p.page_id, p.user_id, p.name, p.page_elements, p.updated_at, p.is_deleted, s.permission
             FROM pages p
             LEFT JOIN page_shares s ON s.page_id = p.page_id AND s.shared_with_user_id = $2
             WHERE p.page_id = $1 AND (p.user_id = $2 OR s.id IS NOT NULL)",
        )
        .bind(page_id)
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((page_id, owner_id, name, elements, updated_at, is_deleted, permission)) = row else {
            return Ok(None);
        };
        let shared_permission = if owner_id == viewer_id {
            None
        } else {
            permission.as_deref().map(parse_permission).transpose()?
        };
        let document = PageDocument {
            page_id,
            owner_id,
            name,
            content: parse_content(page_id, elements)?,
            updated_at,
            is_deleted,
        };
        Ok(Some(FetchedPage { document, shared_permission }))
    }

    async fn update_page(&self, page_id: Uuid, update: &PageUpdate) -> Result<(), BackendError> {
        let content = serde_json::to_value(&update.content)
            .map_err(|e| BackendError::Transfer(format!("page content serialization failed: {e}")))?;
        let result = sqlx::query(
            "UPDATE pages SET name = $2, page_elements = $3, updated_at = $4
             WHERE page_id = $1 AND is_deleted = false",
        )
        .bind(page_id)
        .bind(&update.name)
        .bind(&content)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }
        Ok(())
    }

    async fn create_page(&self, owner_id: Uuid, name: &str) -> Result<PageDocument, BackendError> {
        let page_id = Uuid::new_v4();
        let now = now_ms();
        let content = PageContent::default();
        let raw = serde_json::to_value(&content)
            .map_err(|e| BackendError::Transfer(format!("page content serialization failed: {e}")))?;
        sqlx::query(
            "INSERT INTO pages (page_id, user_id, name, page_elements, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(page_id)
        .bind(owner_id)
        .bind(name)
        .bind(&raw)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(PageDocument { page_id, owner_id, name: name.to_owned(), content, updated_at: now, is_deleted: false })
    }

    async fn rename_page(&self, page_id: Uuid, caller_id: Uuid, name: &str) -> Result<(), BackendError> {
        let result = sqlx::query(
            "UPDATE pages p SET name = $3, updated_at = $4
             WHERE p.page_id = $1 AND p.is_deleted = false
               AND (p.user_id = $2 OR EXISTS (
                    SELECT 1 FROM page_shares s
                    WHERE s.page_id = p.page_id AND s.shared_with_user_id = $2 AND s.permission = 'edit'))",
        )
        .bind(page_id)
        .bind(caller_id)
        .bind(name)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }
        Ok(())
    }

    async fn soft_delete_page(&self, page_id: Uuid, caller_id: Uuid) -> Result<(), BackendError> {
        let result =
            sqlx::query("UPDATE pages SET is_deleted = true WHERE page_id = $1 AND user_id = $2 AND is_deleted = false")
                .bind(page_id)
                .bind(caller_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }
        Ok(())
    }

    async fn list_owned_pages(&self, owner_id: Uuid) -> Result<Vec<PageRow>, BackendError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, i64)>(
            "SELECT page_id, user_id, name, updated_at
             FROM pages
             WHERE user_id = $1 AND is_deleted = false
             ORDER BY updated_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(page_id, owner_id, name, updated_at)| PageRow { page_id, owner_id, name, updated_at })
            .collect())
    }

    async fn list_shared_pages(&self, user_id: Uuid) -> Result<Vec<(PageRow, Permission)>, BackendError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, i64, String)>(
            "SELECT p.page_id, p.user_id, p.name, p.updated_at, s.permission
             FROM page_shares s
             JOIN pages p ON p.page_id = s.page_id
             WHERE s.shared_with_user_id = $1 AND p.is_deleted = false",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(page_id, owner_id, name, updated_at, permission)| {
                Ok((PageRow { page_id, owner_id, name, updated_at }, parse_permission(&permission)?))
            })
            .collect()
    }
}

#[async_trait]
impl ShareStore for PgBackend {
    async fn insert_share(
        &self,
        caller_id: Uuid,
        page_id: Uuid,
        grantee_id: Uuid,
        permission: Permission,
    ) -> Result<ShareRecord, BackendError> {
        let owns: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pages WHERE page_id = $1 AND user_id = $2 AND is_deleted = false)",
        )
        .bind(page_id)
        .bind(caller_id)
        .fetch_one(&self.pool)
        .await?;
        if !owns {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }

        let record = ShareRecord {
            id: Uuid::new_v4(),
            page_id,
            shared_by: caller_id,
            shared_with: grantee_id,
            permission,
            created_at: now_ms(),
        };
        let result = sqlx::query(
            "INSERT INTO page_shares (id, page_id, shared_with_user_id, shared_by_user_id, permission, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (page_id, shared_with_user_id) DO NOTHING",
        )
        .bind(record.id)
        .bind(record.page_id)
        .bind(record.shared_with)
        .bind(record.shared_by)
        .bind(record.permission.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::Conflict(format!("page {page_id} already shared with {grantee_id}")));
        }
        Ok(record)
    }

    async fn list_shares(&self, caller_id: Uuid, page_id: Uuid) -> Result<Vec<ShareListing>, BackendError> {
        let owns: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pages WHERE page_id = $1 AND user_id = $2 AND is_deleted = false)",
        )
        .bind(page_id)
        .bind(caller_id)
        .fetch_one(&self.pool)
        .await?;
        if !owns {
            return Err(BackendError::NotFound(format!("page {page_id}")));
        }

        let rows = sqlx::query_as::<_, (Uuid, Uuid, Uuid, Uuid, String, i64, String, String)>(
            "SELECT s.id, s.page_id, s.shared_by_user_id, s.shared_with_user_id, s.permission, s.created_at,
                    a.email, a.name
             FROM page_shares s
             JOIN accounts a ON a.id = s.shared_with_user_id
             WHERE s.page_id = $1
             ORDER BY s.created_at ASC, s.id ASC",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, page_id, shared_by, shared_with, permission, created_at, email, name)| {
                Ok(ShareListing {
                    share: share_from_tuple((id, page_id, shared_by, shared_with, permission, created_at))?,
                    grantee_email: email,
                    grantee_name: name,
                })
            })
            .collect()
    }

    async fn update_share_permission(
        &self,
        caller_id: Uuid,
        share_id: Uuid,
        permission: Permission,
    ) -> Result<ShareRecord, BackendError> {
        let row = sqlx::query_as::<_, ShareTuple>(
            "UPDATE page_shares s SET permission = $3
             FROM pages p
             WHERE s.id = $1 AND p.page_id = s.page_id AND p.user_id = $2
             RETURNING s.id, s.page_id, s.shared_by_user_id, s.shared_with_user_id, s.permission, s.created_at",
        )
        .bind(share_id)
        .bind(caller_id)
        .bind(permission.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => share_from_tuple(row),
            None => Err(BackendError::NotFound(format!("share {share_id}"))),
        }
    }

    async fn delete_share(&self, caller_id: Uuid, share_id: Uuid) -> Result<(), BackendError> {
        let result = sqlx::query(
            "DELETE FROM page_shares s
             USING pages p
             WHERE s.id = $1 AND p.page_id = s.page_id AND p.user_id = $2",
        )
        .bind(share_id)
        .bind(caller_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("share {share_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for PgBackend {
    async fn account_for_token(&self, token: &str) -> Result<Option<Account>, BackendError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT a.id, a.email, a.name
             FROM sessions s
             JOIN accounts a ON a.id = s.user_id
             WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, email, name)| Account { id, email, name }))
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, BackendError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, email, name FROM accounts WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, email, name)| Account { id, email, name }))
    }

    async fn create_account(&self, email: &str, name: &str, password_hash: &str) -> Result<Account, BackendError> {
        let id = Uuid::new_v4();
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO accounts (id, email, name, password_hash) VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING
             RETURNING id",
        )
        .bind(id)
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_none() {
            return Err(BackendError::Conflict(format!("account {email}")));
        }
        Ok(Account { id, email: email.to_owned(), name: name.to_owned() })
    }

    async fn credentials_for_email(&self, email: &str) -> Result<Option<Credentials>, BackendError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String)>(
            "SELECT id, email, name, password_hash FROM accounts
             WHERE lower(email) = lower($1) AND password_hash IS NOT NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, email, name, password_hash)| Credentials { account: Account { id, email, name }, password_hash }))
    }

    async fn create_session(&self, account_id: Uuid) -> Result<String, BackendError> {
        let token = generate_token();
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES ($1, $2)")
            .bind(&token)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    async fn delete_session(&self, token: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_account(&self, account_id: Uuid, email: &str, name: &str) -> Result<Account, BackendError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "UPDATE accounts SET email = $2, name = $3 WHERE id = $1 RETURNING id, email, name",
        )
        .bind(account_id)
        .bind(email)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_conflict(e, format!("account {email}")))?;

        let (id, email, name) = row.ok_or_else(|| BackendError::NotFound(format!("account {account_id}")))?;
        Ok(Account { id, email, name })
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;

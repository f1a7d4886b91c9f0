//! User store capability and its PostgreSQL implementation.
//!
//! Verification secrets never reach the store in plaintext: callers pass the
//! SHA-256 hex digest, and lookups are by digest as well.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::debug;

use super::errors::{UserStoreError, UserStoreResult, map_insert_error};
use crate::auth::models::{User, UserId};

/// User record persistence consumed by the auth core
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create an unverified user; the verification clock starts now
    async fn create(
        &self,
        email: &str,
        password_hash: &str,
        verification_token_hash: &str,
    ) -> UserStoreResult<User>;

    /// Find user by (normalized) email
    async fn by_email(&self, email: &str) -> UserStoreResult<Option<User>>;

    /// Find user by ID
    async fn by_id(&self, id: UserId) -> UserStoreResult<Option<User>>;

    /// Find an unverified user holding this verification token
    async fn by_verification_token(&self, token_hash: &str) -> UserStoreResult<Option<User>>;

    /// Whether this verification token already verified some user
    async fn was_token_already_consumed(&self, token_hash: &str) -> UserStoreResult<bool>;

    /// Mark the user's email verified
    async fn mark_verified(&self, id: UserId) -> UserStoreResult<()>;

    /// Replace the password hash
    async fn update_password(&self, id: UserId, password_hash: &str) -> UserStoreResult<()>;

    /// Replace the verification token of an unverified user and restart its clock
    async fn rotate_verification_token(&self, id: UserId, token_hash: &str)
    -> UserStoreResult<()>;
}

/// Shared user store handle
pub type SharedUserStore = Arc<dyn UserStore>;

const USER_COLUMNS: &str = "id, email, password_hash, email_verified, verification_token_hash, \
                            verification_sent_at, created_at, updated_at";

/// PostgreSQL-backed user store
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn user_from_row(row: &PgRow) -> User {
        User {
            id: row.get("id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            email_verified: row.get("email_verified"),
            verification_token_hash: row.get("verification_token_hash"),
            verification_sent_at: row.get::<Option<DateTime<Utc>>, _>("verification_sent_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> UserStoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::user_from_row))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(
        &self,
        email: &str,
        password_hash: &str,
        verification_token_hash: &str,
    ) -> UserStoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, verification_token_hash, verification_sent_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(UserId::new_v4())
            .bind(email)
            .bind(password_hash)
            .bind(verification_token_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(map_insert_error)?;

        let user = Self::user_from_row(&row);
        debug!(user_id = %user.id, "User row inserted");
        Ok(user)
    }

    async fn by_email(&self, email: &str) -> UserStoreResult<Option<User>> {
        self.fetch_one_where("email = $1", email).await
    }

    async fn by_id(&self, id: UserId) -> UserStoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::user_from_row))
    }

    async fn by_verification_token(&self, token_hash: &str) -> UserStoreResult<Option<User>> {
        self.fetch_one_where(
            "verification_token_hash = $1 AND email_verified = FALSE",
            token_hash,
        )
        .await
    }

    async fn was_token_already_consumed(&self, token_hash: &str) -> UserStoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM users WHERE verification_token_hash = $1 AND email_verified = TRUE)",
        )
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>(0))
    }

    async fn mark_verified(&self, id: UserId) -> UserStoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserStoreError::NotFound);
        }
        Ok(())
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> UserStoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(UserStoreError::NotFound);
        }
        Ok(())
    }

    async fn rotate_verification_token(
        &self,
        id: UserId,
        token_hash: &str,
    ) -> UserStoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET verification_token_hash = $1, verification_sent_at = NOW(), updated_at = NOW()
            WHERE id = $2 AND email_verified = FALSE
            "#,
        )
        .bind(token_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserStoreError::NotFound);
        }
        Ok(())
    }
}

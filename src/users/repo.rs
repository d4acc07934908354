use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::users::repo_types::{NewUserRow, User};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("duplicate value violates {constraint}")]
    Conflict { constraint: String },
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return StorageError::Conflict {
                    constraint: db_err.constraint().unwrap_or("unique index").to_string(),
                };
            }
        }
        StorageError::Database(e)
    }
}

/// Durable storage of user records. A missing row is never an error: lookups
/// return `None` and mutations return `false`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users in insertion order.
    async fn list_all(&self) -> Result<Vec<User>, StorageError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StorageError>;
    async fn find_by_username_ci(&self, username: &str) -> Result<Option<User>, StorageError>;
    async fn find_by_email_ci(&self, email: &str) -> Result<Option<User>, StorageError>;
    async fn insert(&self, user: NewUserRow) -> Result<User, StorageError>;
    async fn update_username(&self, id: Uuid, new_username: &str) -> Result<bool, StorageError>;
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list_all(&self) -> Result<Vec<User>, StorageError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        debug!(count = users.len(), "listed users");
        Ok(users)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username_ci(&self, username: &str) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE LOWER(username) = LOWER($1)
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email_ci(&self, email: &str) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE LOWER(email) = LOWER($1)
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUserRow) -> Result<User, StorageError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await?;
        debug!(user_id = %user.id, "inserted user");
        Ok(user)
    }

    async fn update_username(&self, id: Uuid, new_username: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(r#"UPDATE users SET username = $1 WHERE id = $2"#)
            .bind(new_username)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

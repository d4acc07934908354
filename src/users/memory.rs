use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::users::repo::{StorageError, UserStore};
use crate::users::repo_types::{NewUserRow, User};

/// In-process store with the same unique indexes as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    rows: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn conflict(constraint: &str) -> StorageError {
    StorageError::Conflict {
        constraint: constraint.to_string(),
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn list_all(&self) -> Result<Vec<User>, StorageError> {
        Ok(self.rows.read().await.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        Ok(self.rows.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_username_ci(&self, username: &str) -> Result<Option<User>, StorageError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|u| same(&u.username, username)).cloned())
    }

    async fn find_by_email_ci(&self, email: &str) -> Result<Option<User>, StorageError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|u| same(&u.email, email)).cloned())
    }

    async fn insert(&self, user: NewUserRow) -> Result<User, StorageError> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|u| u.id == user.id) {
            return Err(conflict("users_pkey"));
        }
        if rows.iter().any(|u| same(&u.username, &user.username)) {
            return Err(conflict("users_username_lower_key"));
        }
        if rows.iter().any(|u| same(&u.email, &user.email)) {
            return Err(conflict("users_email_lower_key"));
        }
        let user = User {
            id: user.id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        rows.push(user.clone());
        Ok(user)
    }

    async fn update_username(&self, id: Uuid, new_username: &str) -> Result<bool, StorageError> {
        let mut rows = self.rows.write().await;
        if rows
            .iter()
            .any(|u| u.id != id && same(&u.username, new_username))
        {
            return Err(conflict("users_username_lower_key"));
        }
        match rows.iter_mut().find(|u| u.id == id) {
            Some(user) => {
                user.username = new_username.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|u| u.id != id);
        Ok(rows.len() != before)
    }
}

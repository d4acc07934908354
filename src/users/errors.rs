use crate::users::{password::CredentialError, repo::StorageError};

/// Outcome of a failed identity operation. Messages never carry a password.
#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),
    #[error("User not found")]
    NotFound,
    #[error("Incorrect password")]
    Authentication,
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

use argon2::{
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::config::HashConfig;
use crate::users::dto::Password;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid argon2 parameters: {0}")]
    Params(argon2::Error),
    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),
    #[error("stored password hash is malformed: {0}")]
    MalformedHash(argon2::password_hash::Error),
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Salted argon2id hashing. Output is a PHC string carrying algorithm,
/// version, cost parameters and salt, so `verify` needs nothing else.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, CredentialError> {
        let params =
            Params::new(memory_kib, iterations, parallelism, None).map_err(CredentialError::Params)?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn from_config(cfg: &HashConfig) -> Result<Self, CredentialError> {
        Self::new(cfg.memory_kib, cfg.iterations, cfg.parallelism)
    }

    /// Runs on the blocking pool; the work factor is CPU-bound by design.
    pub async fn hash(&self, plain: &Password) -> Result<String, CredentialError> {
        let argon2 = self.argon2.clone();
        let plain = plain.expose().to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(plain.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| {
                    error!(error = %e, "argon2 hash_password error");
                    CredentialError::Hash(e)
                })
        })
        .await?
    }

    /// `Ok(false)` on mismatch. Only an unparsable `stored` value is an error.
    pub async fn verify(&self, plain: &Password, stored: &str) -> Result<bool, CredentialError> {
        let argon2 = self.argon2.clone();
        let plain = plain.expose().to_owned();
        let stored = stored.to_owned();
        tokio::task::spawn_blocking(move || -> Result<bool, CredentialError> {
            let parsed = PasswordHash::new(&stored).map_err(|e| {
                error!(error = %e, "argon2 parse hash error");
                CredentialError::MalformedHash(e)
            })?;
            Ok(argon2.verify_password(plain.as_bytes(), &parsed).is_ok())
        })
        .await?
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    CredentialHasher::new(8, 1, 1).expect("cheap argon2 params are valid")
}

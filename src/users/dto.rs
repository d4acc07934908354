use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::errors::UserError;
use crate::users::repo_types::User;

/// Plaintext password as received from a form. Never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(plain: impl Into<String>) -> Self {
        Self(plain.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// A missing or empty password field is a validation failure.
    pub fn required(field: Option<Password>) -> Result<Password, UserError> {
        match field {
            Some(p) if !p.0.is_empty() => Ok(p),
            _ => Err(UserError::Validation("Password is required".into())),
        }
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// The user as shown to the outside world: everything but the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
        }
    }
}

// --- form bodies ---

#[derive(Debug, Deserialize)]
pub struct NewUserForm {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<Password>,
}

/// Body of PATCH/DELETE `/user/:id`, or of a POST carrying `_method`.
#[derive(Debug, Deserialize)]
pub struct UserMutationForm {
    #[serde(rename = "_method")]
    pub method: Option<String>,
    pub username: Option<String>,
    pub password: Option<Password>,
}

#[derive(Debug, Deserialize)]
pub struct SignInForm {
    pub username: Option<String>,
    pub password: Option<Password>,
}

// --- validated requests ---

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: Password,
}

impl NewUser {
    pub fn parse(
        username: Option<String>,
        email: Option<String>,
        password: Option<Password>,
    ) -> Result<Self, UserError> {
        let username = required_text(username, "Username")?;
        let email = required_text(email, "Email")?.to_lowercase();
        if !is_valid_email(&email) {
            return Err(UserError::Validation("Invalid email".into()));
        }
        let password = Password::required(password)?;
        Ok(Self {
            username,
            email,
            password,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UsernameChange {
    pub new_username: String,
    pub password: Password,
}

impl UsernameChange {
    pub fn parse(username: Option<String>, password: Option<Password>) -> Result<Self, UserError> {
        Ok(Self {
            new_username: required_text(username, "Username")?,
            password: Password::required(password)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Password,
}

impl Credentials {
    pub fn parse(username: Option<String>, password: Option<Password>) -> Result<Self, UserError> {
        Ok(Self {
            username: required_text(username, "Username")?,
            password: Password::required(password)?,
        })
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String, UserError> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        return Err(UserError::Validation(format!("{field} is required")));
    }
    Ok(value)
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

use serde::{Deserialize, Serialize};

/// Failure to derive an operator id from an authenticated email.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("'{0}' is not a usable email address")]
    InvalidEmail(String),
}

/// The authenticated human driving a session.
///
/// `id` is the local part of the email and addresses both the per-operator
/// channel and every REST route. It never changes for the channel's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorIdentity {
    pub id: String,
    pub display_email: String,
}

impl OperatorIdentity {
    /// Derives the identity from an authenticated email address.
    pub fn from_email(email: &str) -> Result<Self, IdentityError> {
        let email = email.trim();
        let local = match email.split_once('@') {
            Some((local, _)) => local,
            None => email,
        };
        if local.is_empty() || local.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(IdentityError::InvalidEmail(email.to_string()));
        }
        Ok(Self {
            id: local.to_string(),
            display_email: email.to_string(),
        })
    }
}

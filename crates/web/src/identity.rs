//! Identity provider interface.
//!
//! The provider issues and validates access tokens. The session guard is the
//! only caller; everything else sees the resolved [`SessionUser`].

use async_trait::async_trait;
use rewoven_core::{Email, Role, UserId};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::AccessToken;

/// Signed-in user as seen by the route gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    /// `None` when the backend reports a role this build does not recognize.
    pub role: Option<Role>,
    pub display_name: String,
    pub email: Option<String>,
}

/// Email + password sign-in.
pub struct Credentials {
    pub email: Email,
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(email: Email, password: impl Into<String>) -> Self {
        Self {
            email,
            password: SecretString::from(password.into()),
        }
    }
}

/// Result of a successful sign-in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: SessionUser,
    pub token: AccessToken,
}

/// Errors raised by the identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Email or password rejected.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Token is unknown, expired, or revoked.
    #[error("no active session")]
    NoSession,

    /// Provider did not answer within the allotted time.
    #[error("identity check timed out")]
    Timeout,

    /// The user has no profile row, so no role can be derived.
    #[error("profile missing for user {0}")]
    ProfileMissing(UserId),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Provider refused the call for another reason.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Issues, validates, and revokes sessions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the user owning `token`.
    ///
    /// Returns `Ok(None)` when the provider definitively reports no session.
    async fn current_session(&self, token: &AccessToken)
    -> Result<Option<SessionUser>, IdentityError>;

    /// Exchange credentials for a session.
    async fn sign_in(&self, credentials: &Credentials) -> Result<SignedIn, IdentityError>;

    /// Revoke `token`.
    async fn sign_out(&self, token: &AccessToken) -> Result<(), IdentityError>;
}

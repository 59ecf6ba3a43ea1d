//! Remote data backend interface.
//!
//! The backend-as-a-service owns the source of truth and enforces its own
//! row-level authorization; every call carries the caller's access token.
//! Rows cross this boundary as JSON so the trait stays object safe; the cache
//! layer decodes them into typed entities.

use async_trait::async_trait;
use rewoven_core::EntityKind;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

/// Bearer token issued by the identity provider.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Reveal the token for an outgoing request.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Errors returned by the remote backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// Response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Endpoint URL could not be built.
    #[error("invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    /// Row to update or delete does not exist (or is not visible to the caller).
    #[error("{kind} row {id} not found")]
    NotFound {
        /// Collection of the missing row.
        kind: EntityKind,
        /// Requested id.
        id: String,
    },

    /// Backend unreachable or refused the call for a transient reason.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Per-kind CRUD against the remote backend.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// List every row of `kind` visible to the token's owner.
    async fn list(&self, token: &AccessToken, kind: EntityKind) -> Result<Vec<Value>, BackendError>;

    /// Insert a row and return it as stored.
    async fn create(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        payload: Value,
    ) -> Result<Value, BackendError>;

    /// Apply a partial update and return the updated row.
    async fn update(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        id: &str,
        patch: Value,
    ) -> Result<Value, BackendError>;

    /// Delete a row.
    async fn delete(&self, token: &AccessToken, kind: EntityKind, id: &str)
    -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_debug_redacts() {
        let token = AccessToken::new("eyJhbGciOiJIUzI1NiJ9.secret-part");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-part"));
        assert_eq!(token.expose(), "eyJhbGciOiJIUzI1NiJ9.secret-part");
    }
}

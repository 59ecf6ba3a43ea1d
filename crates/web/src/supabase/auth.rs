//! `GoTrue` client implementing the identity provider.

use std::sync::Arc;

use async_trait::async_trait;
use rewoven_core::{EntityKind, Profile, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{RestClient, error_message, excerpt, retry_after};
use crate::backend::{AccessToken, BackendError};
use crate::config::SupabaseConfig;
use crate::identity::{Credentials, IdentityError, IdentityProvider, SessionUser, SignedIn};

/// Client for the Supabase auth API.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<AuthClientInner>,
}

struct AuthClientInner {
    client: reqwest::Client,
    base: Url,
    anon_key: SecretString,
    rest: RestClient,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

#[derive(Deserialize)]
struct AuthUser {
    id: UserId,
    #[serde(default)]
    email: Option<String>,
}

impl AuthClient {
    /// Create an auth client. Profile lookups go through `rest`.
    #[must_use]
    pub fn new(config: &SupabaseConfig, rest: RestClient) -> Self {
        Self::with_client(reqwest::Client::new(), config, rest)
    }

    /// Create an auth client sharing an existing HTTP connection pool.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &SupabaseConfig, rest: RestClient) -> Self {
        Self {
            inner: Arc::new(AuthClientInner {
                client,
                base: config.url.clone(),
                anon_key: config.anon_key.clone(),
                rest,
            }),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, IdentityError> {
        self.inner
            .base
            .join(&format!("auth/v1/{path}"))
            .map_err(|e| IdentityError::Unavailable(format!("invalid auth URL: {e}")))
    }

    /// Build the session user from the `profiles` row; the role lives there.
    async fn resolve_user(
        &self,
        token: &AccessToken,
        user: AuthUser,
    ) -> Result<SessionUser, IdentityError> {
        let row = self
            .inner
            .rest
            .fetch_by_id(token, EntityKind::Users, &user.id.to_string())
            .await
            .map_err(backend_to_identity)?
            .ok_or(IdentityError::ProfileMissing(user.id))?;
        let profile: Profile = serde_json::from_value(row)?;

        if profile.role.is_none() {
            warn!(user_id = %user.id, "Profile carries an unrecognized role");
        }

        Ok(SessionUser {
            id: user.id,
            role: profile.role,
            display_name: profile.display_name,
            email: user.email.or(profile.email),
        })
    }
}

#[async_trait]
impl IdentityProvider for AuthClient {
    #[instrument(skip(self, token))]
    async fn current_session(
        &self,
        token: &AccessToken,
    ) -> Result<Option<SessionUser>, IdentityError> {
        let response = self
            .inner
            .client
            .get(self.endpoint("user")?)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(token.expose())
            .send()
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            debug!(status = %status, "Token rejected by identity provider");
            return Ok(None);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IdentityError::Unavailable(format!(
                "rate limited, retry after {} seconds",
                retry_after(&response)
            )));
        }

        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = %status, body = %excerpt(&body), "Identity check failed");
            return Err(IdentityError::Unavailable(error_message(&body)));
        }

        let user: AuthUser = serde_json::from_str(&body)?;
        self.resolve_user(token, user).await.map(Some)
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    async fn sign_in(&self, credentials: &Credentials) -> Result<SignedIn, IdentityError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .inner
            .client
            .post(url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .json(&PasswordGrant {
                email: credentials.email.as_str(),
                password: credentials.password.expose_secret(),
            })
            .send()
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(IdentityError::InvalidCredentials);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IdentityError::Unavailable(format!(
                "rate limited, retry after {} seconds",
                retry_after(&response)
            )));
        }

        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = %status, body = %excerpt(&body), "Sign-in failed");
            return Err(IdentityError::Unavailable(error_message(&body)));
        }

        let grant: TokenResponse = serde_json::from_str(&body)?;
        let token = AccessToken::new(grant.access_token);
        let user = self.resolve_user(&token, grant.user).await?;
        debug!(user_id = %user.id, "Signed in");
        Ok(SignedIn { user, token })
    }

    #[instrument(skip(self, token))]
    async fn sign_out(&self, token: &AccessToken) -> Result<(), IdentityError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("logout")?)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(token.expose())
            .send()
            .await?;
        let status = response.status();

        // An already-expired token has nothing left to revoke.
        if status.is_success() || status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(());
        }
        let body = response.text().await?;
        Err(IdentityError::Unavailable(error_message(&body)))
    }
}

fn backend_to_identity(err: BackendError) -> IdentityError {
    match err {
        BackendError::Http(e) => IdentityError::Http(e),
        BackendError::Parse(e) => IdentityError::Parse(e),
        other => IdentityError::Unavailable(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_decodes() {
        let body = r#"{
            "access_token": "eyJ.abc.def",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": {"id": "0b6f3a0e-7f6a-4a5e-9d1e-5c2b1a0f9e8d", "email": "mill@example.com"}
        }"#;
        let grant: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(grant.access_token, "eyJ.abc.def");
        assert_eq!(grant.user.email.as_deref(), Some("mill@example.com"));
    }

    #[test]
    fn test_backend_status_maps_to_unavailable() {
        let err = backend_to_identity(BackendError::Status {
            status: 500,
            message: "boom".to_string(),
        });
        assert!(matches!(err, IdentityError::Unavailable(m) if m.contains("boom")));
    }
}

//! Session guard: tri-state identity and role-gated navigation.
//!
//! Every protected request resolves the caller's identity through the guard
//! before anything is rendered. Resolution fails closed: a provider error, a
//! timeout, or an unreadable auth record all count as signed out. The role
//! hint stored next to the token only decides whether a slow restoration
//! shows a loading state or a login redirect; it never grants access.
//!
//! # Restoration
//!
//! ```text
//! auth record ──▶ identity cache hit ──────────────▶ decide(Authenticated)
//!      │
//!      └──▶ live check (coalesced per token, bounded by identity_timeout)
//!               │ resolved within restore_budget ──▶ decide(Authenticated | Unauthenticated)
//!               │ still running, hint present ────▶ Loading (check continues, result cached)
//!               └ still running, no hint ─────────▶ /login
//! ```

mod extract;

pub use extract::{AdminOnly, AnyRole, BuyerOnly, FactoryOnly, Gate, GuardRejection, Guarded};

use std::sync::Arc;

use moka::future::Cache;
use rewoven_core::{Role, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::backend::AccessToken;
use crate::config::GuardConfig;
use crate::identity::{Credentials, IdentityError, IdentityProvider, SessionUser};
use crate::store::{KeyValueStore, StoreError};

/// Where unauthenticated visitors are sent.
pub const LOGIN_PATH: &str = "/login";

/// Where users with an unrecognized role are sent.
pub const FALLBACK_PATH: &str = "/";

/// Session-store key of the [`AuthRecord`].
pub const AUTH_RECORD_KEY: &str = "auth";

const IDENTITY_CACHE_CAPACITY: u64 = 10_000;
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Who is making the request, as far as the guard knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No valid session.
    Unauthenticated,
    /// A stored token is being checked with the provider.
    Restoring,
    /// Token confirmed by the provider.
    Authenticated(SessionUser),
}

/// What a gated route should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    /// Show a blocking loading indicator; neither render nor redirect.
    Loading,
    Redirect(&'static str),
}

/// Decide how a route gated on `required` treats `identity`.
///
/// `hint` is the role remembered from the last sign-in. It only matters while
/// restoring.
#[must_use]
pub fn decide(identity: &Identity, hint: Option<Role>, required: Option<Role>) -> GuardDecision {
    match identity {
        Identity::Restoring if hint.is_some() => GuardDecision::Loading,
        Identity::Restoring | Identity::Unauthenticated => GuardDecision::Redirect(LOGIN_PATH),
        Identity::Authenticated(user) => match required {
            Some(role) if user.role != Some(role) => {
                GuardDecision::Redirect(user.role.map_or(FALLBACK_PATH, Role::home_path))
            }
            _ => GuardDecision::Render,
        },
    }
}

/// Token and role hint, stored together under [`AUTH_RECORD_KEY`] so a single
/// removal forgets both.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    pub access_token: String,
    pub user_id: UserId,
    #[serde(default)]
    pub role_hint: Option<Role>,
}

impl AuthRecord {
    #[must_use]
    pub fn token(&self) -> AccessToken {
        AccessToken::new(self.access_token.clone())
    }
}

impl std::fmt::Debug for AuthRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRecord")
            .field("access_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("role_hint", &self.role_hint)
            .finish()
    }
}

/// Result of [`SessionGuard::check`].
#[derive(Debug, Clone)]
pub enum GuardOutcome {
    Render { user: SessionUser, token: AccessToken },
    Loading,
    Redirect(&'static str),
}

/// Broadcast whenever a user's session starts or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    SignedIn(UserId),
    SignedOut(UserId),
}

/// Errors from sign-in and sign-out.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not encode auth record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a live identity check did not produce a user.
#[derive(Debug)]
enum CheckFailure {
    /// The provider definitively reports no session for the token.
    NoSession,
    /// Timeout, network or provider error. Transient, never cached.
    Failed(String),
}

/// Resolves identities and gates routes.
#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<SessionGuardInner>,
}

struct SessionGuardInner {
    provider: Arc<dyn IdentityProvider>,
    identities: Cache<String, SessionUser>,
    config: GuardConfig,
    changes: broadcast::Sender<IdentityChange>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, config: GuardConfig) -> Self {
        let identities = Cache::builder()
            .max_capacity(IDENTITY_CACHE_CAPACITY)
            .time_to_live(config.identity_ttl)
            .build();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionGuardInner {
                provider,
                identities,
                config,
                changes,
            }),
        }
    }

    /// Subscribe to sign-in and sign-out notifications.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<IdentityChange> {
        self.inner.changes.subscribe()
    }

    /// Resolve the caller stored in `store` and gate on `required`.
    ///
    /// Never errors: anything that prevents confirming the session yields a
    /// redirect to [`LOGIN_PATH`].
    #[instrument(skip(self, store))]
    pub async fn check(&self, store: &dyn KeyValueStore, required: Option<Role>) -> GuardOutcome {
        let Some(record) = read_record(store).await else {
            return outcome(&Identity::Unauthenticated, None, required, None);
        };
        let token = record.token();
        let key = fingerprint(&token);

        if let Some(user) = self.inner.identities.get(&key).await {
            return outcome(&Identity::Authenticated(user), record.role_hint, required, Some(token));
        }

        let guard = self.clone();
        let check_token = token.clone();
        let check = tokio::spawn(async move { guard.resolve(key, &check_token).await });

        let resolved = match tokio::time::timeout(self.inner.config.restore_budget, check).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Arc::new(CheckFailure::Failed(join_error.to_string()))),
            Err(_) => {
                debug!(hint = ?record.role_hint, "Restoration still running");
                return outcome(&Identity::Restoring, record.role_hint, required, None);
            }
        };

        match resolved {
            Ok(user) => {
                if record.role_hint != user.role {
                    self.rewrite_hint(store, &record, user.role).await;
                }
                outcome(&Identity::Authenticated(user), record.role_hint, required, Some(token))
            }
            Err(failure) => {
                match failure.as_ref() {
                    CheckFailure::NoSession => {
                        info!(user_id = %record.user_id, "Stored session no longer valid");
                        if let Err(e) = store.remove(AUTH_RECORD_KEY).await {
                            warn!(error = %e, "Failed to clear stale auth record");
                        }
                        let _ = self.inner.changes.send(IdentityChange::SignedOut(record.user_id));
                    }
                    CheckFailure::Failed(reason) => {
                        warn!(reason = %reason, "Identity check failed; treating as signed out");
                    }
                }
                outcome(&Identity::Unauthenticated, record.role_hint, required, None)
            }
        }
    }

    /// Live provider check, coalesced per token and cached on success.
    async fn resolve(&self, key: String, token: &AccessToken) -> Result<SessionUser, Arc<CheckFailure>> {
        let provider = Arc::clone(&self.inner.provider);
        let timeout = self.inner.config.identity_timeout;
        self.inner
            .identities
            .try_get_with(key, async move {
                match tokio::time::timeout(timeout, provider.current_session(token)).await {
                    Ok(Ok(Some(user))) => Ok(user),
                    Ok(Ok(None) | Err(IdentityError::NoSession)) => Err(CheckFailure::NoSession),
                    Ok(Err(e)) => Err(CheckFailure::Failed(e.to_string())),
                    Err(_) => Err(CheckFailure::Failed(IdentityError::Timeout.to_string())),
                }
            })
            .await
    }

    async fn rewrite_hint(&self, store: &dyn KeyValueStore, record: &AuthRecord, role: Option<Role>) {
        let corrected = AuthRecord {
            role_hint: role,
            ..record.clone()
        };
        match serde_json::to_string(&corrected) {
            Ok(blob) => {
                if let Err(e) = store.set(AUTH_RECORD_KEY, blob).await {
                    warn!(error = %e, "Failed to rewrite role hint");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode auth record"),
        }
    }

    /// Exchange credentials for a session and remember it in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the credentials or the record
    /// cannot be stored. Nothing is stored on error.
    #[instrument(skip(self, store, credentials), fields(email = %credentials.email))]
    pub async fn sign_in(
        &self,
        store: &dyn KeyValueStore,
        credentials: &Credentials,
    ) -> Result<SessionUser, GuardError> {
        let signed_in = self.inner.provider.sign_in(credentials).await?;
        let record = AuthRecord {
            access_token: signed_in.token.expose().to_string(),
            user_id: signed_in.user.id,
            role_hint: signed_in.user.role,
        };
        store.set(AUTH_RECORD_KEY, serde_json::to_string(&record)?).await?;

        self.inner
            .identities
            .insert(fingerprint(&signed_in.token), signed_in.user.clone())
            .await;
        let _ = self.inner.changes.send(IdentityChange::SignedIn(signed_in.user.id));
        info!(user_id = %signed_in.user.id, role = ?signed_in.user.role, "Signed in");
        Ok(signed_in.user)
    }

    /// End the session held in `store`.
    ///
    /// The auth record is removed in one operation; if that fails nothing else
    /// changes. Revoking the token with the provider is best effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth record cannot be removed.
    #[instrument(skip(self, store))]
    pub async fn sign_out(&self, store: &dyn KeyValueStore) -> Result<(), GuardError> {
        let record = read_record(store).await;
        store.remove(AUTH_RECORD_KEY).await?;

        let Some(record) = record else {
            return Ok(());
        };
        let token = record.token();
        self.inner.identities.invalidate(&fingerprint(&token)).await;
        let _ = self.inner.changes.send(IdentityChange::SignedOut(record.user_id));
        info!(user_id = %record.user_id, "Signed out");

        match tokio::time::timeout(
            self.inner.config.identity_timeout,
            self.inner.provider.sign_out(&token),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Provider sign-out failed"),
            Err(_) => warn!("Provider sign-out timed out"),
        }
        Ok(())
    }
}

fn outcome(
    identity: &Identity,
    hint: Option<Role>,
    required: Option<Role>,
    token: Option<AccessToken>,
) -> GuardOutcome {
    match (decide(identity, hint, required), identity, token) {
        (GuardDecision::Render, Identity::Authenticated(user), Some(token)) => GuardOutcome::Render {
            user: user.clone(),
            token,
        },
        (GuardDecision::Loading, _, _) => GuardOutcome::Loading,
        (GuardDecision::Redirect(path), _, _) => GuardOutcome::Redirect(path),
        // Render without a confirmed user and token cannot happen; fail closed.
        (GuardDecision::Render, _, _) => GuardOutcome::Redirect(LOGIN_PATH),
    }
}

/// Read the auth record; missing, corrupt or unreadable means signed out.
async fn read_record(store: &dyn KeyValueStore) -> Option<AuthRecord> {
    let blob = match store.get(AUTH_RECORD_KEY).await {
        Ok(blob) => blob?,
        Err(e) => {
            warn!(error = %e, "Failed to read auth record");
            return None;
        }
    };
    match serde_json::from_str(&blob) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "Discarding corrupt auth record");
            None
        }
    }
}

/// Cache key for a token; the raw token never becomes a map key.
fn fingerprint(token: &AccessToken) -> String {
    hex::encode(Sha256::digest(token.expose().as_bytes()))
}

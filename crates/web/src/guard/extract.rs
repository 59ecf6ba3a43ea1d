//! Axum extractors that put routes behind the session guard.

use std::marker::PhantomData;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use rewoven_core::Role;
use tower_sessions::Session;

use super::{GuardOutcome, LOGIN_PATH};
use crate::cache::EntityCache;
use crate::error::set_sentry_user;
use crate::identity::SessionUser;
use crate::state::AppState;
use crate::store::SessionStore;

/// Role requirement of a gated route.
pub trait Gate: Send + Sync + 'static {
    const REQUIRED: Option<Role>;
}

/// Any signed-in user.
pub struct AnyRole;
/// Administrators only.
pub struct AdminOnly;
/// Factories (sellers) only.
pub struct FactoryOnly;
/// Buyers only.
pub struct BuyerOnly;

impl Gate for AnyRole {
    const REQUIRED: Option<Role> = None;
}

impl Gate for AdminOnly {
    const REQUIRED: Option<Role> = Some(Role::Admin);
}

impl Gate for FactoryOnly {
    const REQUIRED: Option<Role> = Some(Role::Factory);
}

impl Gate for BuyerOnly {
    const REQUIRED: Option<Role> = Some(Role::Buyer);
}

/// Extractor that only succeeds once the guard says "render".
///
/// # Example
///
/// ```rust,ignore
/// async fn dashboard(Guarded { user, cache, .. }: Guarded<FactoryOnly>) -> Result<Json<Value>> {
///     let listings = cache.fetch::<Listing>().await?;
///     // ...
/// }
/// ```
pub struct Guarded<G: Gate = AnyRole> {
    pub user: SessionUser,
    /// The signed-in user's entity cache.
    pub cache: EntityCache,
    gate: PhantomData<G>,
}

/// Why a gated route did not render.
#[derive(Debug)]
pub enum GuardRejection {
    /// Send the visitor elsewhere.
    Redirect(&'static str),
    /// Session restoration is still in progress.
    Loading,
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect(path) => Redirect::to(path).into_response(),
            Self::Loading => {
                let mut response = (
                    StatusCode::SERVICE_UNAVAILABLE,
                    axum::Json(serde_json::json!({ "status": "loading" })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                response
            }
        }
    }
}

impl<S, G> FromRequestParts<S> for Guarded<G>
where
    AppState: FromRef<S>,
    S: Send + Sync,
    G: Gate,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        // Get the session from extensions (set by SessionManagerLayer)
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(GuardRejection::Redirect(LOGIN_PATH))?;
        let store = SessionStore::new(session);

        match state.guard().check(&store, G::REQUIRED).await {
            GuardOutcome::Render { user, token } => {
                set_sentry_user(&user.id, user.email.as_deref());
                let cache = state.caches().cache_for(user.id, &token).await;
                Ok(Self {
                    user,
                    cache,
                    gate: PhantomData,
                })
            }
            GuardOutcome::Loading => Err(GuardRejection::Loading),
            GuardOutcome::Redirect(path) => Err(GuardRejection::Redirect(path)),
        }
    }
}

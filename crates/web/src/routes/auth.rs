//! Sign-in and sign-out routes.

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use rewoven_core::{Email, Role};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use crate::error::{AppError, Result, clear_sentry_user};
use crate::guard::{FALLBACK_PATH, GuardOutcome, LOGIN_PATH};
use crate::identity::Credentials;
use crate::state::AppState;
use crate::store::SessionStore;

/// Login form data.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// Describes how to sign in.
#[derive(Debug, Serialize)]
pub struct LoginPage {
    pub action: &'static str,
    pub method: &'static str,
    pub fields: [&'static str; 2],
}

fn home_of(role: Option<Role>) -> &'static str {
    role.map_or(FALLBACK_PATH, Role::home_path)
}

/// Display the login entry point, or send a signed-in visitor home.
pub async fn login_page(State(state): State<AppState>, session: Session) -> Response {
    let store = SessionStore::new(session);
    if let GuardOutcome::Render { user, .. } = state.guard().check(&store, None).await {
        return Redirect::to(home_of(user.role)).into_response();
    }
    Json(LoginPage {
        action: LOGIN_PATH,
        method: "POST",
        fields: ["email", "password"],
    })
    .into_response()
}

/// Handle login.
///
/// On success the visitor is sent to the home of their role.
#[instrument(skip(state, session, form))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(form): Json<LoginForm>,
) -> Result<Redirect> {
    let email = Email::parse(&form.email).map_err(|e| AppError::BadRequest(e.to_string()))?;
    if form.password.is_empty() {
        return Err(AppError::BadRequest("password is required".to_string()));
    }

    // New session id on every sign-in
    session
        .cycle_id()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let store = SessionStore::new(session);
    let user = state
        .guard()
        .sign_in(&store, &Credentials::new(email, form.password))
        .await?;
    Ok(Redirect::to(home_of(user.role)))
}

/// Handle logout.
pub async fn logout(State(state): State<AppState>, session: Session) -> Result<Redirect> {
    state.guard().sign_out(&SessionStore::new(session)).await?;
    clear_sentry_user();
    Ok(Redirect::to(LOGIN_PATH))
}

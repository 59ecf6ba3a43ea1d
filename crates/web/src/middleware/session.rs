//! Session middleware configuration.
//!
//! Cookie sessions over the tower-sessions in-memory store. The session holds
//! only the auth record; restarting the process signs everyone out.

use std::time::Duration;

use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "rewoven_session";

/// Session inactivity expiry (7 days).
pub const SESSION_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Create the session layer.
///
/// `secure` sets the `Secure` cookie attribute; pass `true` when served over
/// https.
#[must_use]
pub fn create_session_layer(secure: bool) -> SessionManagerLayer<MemoryStore> {
    #[allow(clippy::cast_possible_wrap)]
    let expiry = tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY.as_secs() as i64);

    SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(expiry))
        .with_secure(secure)
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

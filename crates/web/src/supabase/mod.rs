//! Supabase clients for the remote backend and the identity provider.
//!
//! # Architecture
//!
//! - [`RestClient`] implements [`RemoteBackend`](crate::backend::RemoteBackend)
//!   over `PostgREST` (`/rest/v1/<table>`).
//! - [`AuthClient`] implements [`IdentityProvider`](crate::identity::IdentityProvider)
//!   over `GoTrue` (`/auth/v1/*`), deriving the role from the `profiles` row.
//! - Every request sends the project's anon key as `apikey` and the caller's
//!   access token as the bearer, so row-level security applies per user.
//!
//! No response caching happens here; that is the entity cache's job.

mod auth;
mod rest;

pub use auth::AuthClient;
pub use rest::RestClient;

use serde::Deserialize;

/// Maximum number of body characters kept in logs and error messages.
const BODY_EXCERPT_CHARS: usize = 200;

/// Error body shapes returned by `PostgREST` and `GoTrue`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

/// Extract a human-readable message from an error response body.
fn error_message(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| excerpt(body))
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

/// Parse `Retry-After` from a rate-limited response, defaulting to one second.
fn retry_after(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_field() {
        let body = r#"{"code":"42501","message":"permission denied for table listings"}"#;
        assert_eq!(error_message(body), "permission denied for table listings");
    }

    #[test]
    fn test_error_message_gotrue_shape() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(error_message(body), "Invalid login credentials");
    }

    #[test]
    fn test_error_message_non_json_is_truncated() {
        let body = "x".repeat(500);
        assert_eq!(error_message(&body).len(), BODY_EXCERPT_CHARS);
    }
}

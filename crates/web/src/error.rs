//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rewoven_core::ValidationError;
use serde_json::json;
use thiserror::Error;

use crate::backend::BackendError;
use crate::cache::CacheError;
use crate::guard::GuardError;
use crate::identity::IdentityError;
use crate::store::StoreError;

/// Application-level error type for the web crate.
#[derive(Debug, Error)]
pub enum AppError {
    /// Remote backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Entity cache operation failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Identity provider call failed.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Key-value store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Submitted form failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Signed-in user may not touch this resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Backend(err) => backend_status(err),
            Self::Cache(CacheError::Backend(err)) => backend_status(err),
            Self::Cache(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Identity(err) => match err {
                IdentityError::InvalidCredentials | IdentityError::NoSession => {
                    StatusCode::UNAUTHORIZED
                }
                IdentityError::ProfileMissing(_) => StatusCode::FORBIDDEN,
                IdentityError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    // Don't expose internal error details to clients
    fn public_message(&self) -> String {
        match self {
            Self::Backend(_) | Self::Cache(_) => match self.status() {
                StatusCode::NOT_FOUND => "Not found".to_string(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "Not allowed".to_string(),
                StatusCode::BAD_REQUEST => "Request rejected".to_string(),
                StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
                _ => "External service error".to_string(),
            },
            Self::Identity(err) => match err {
                IdentityError::InvalidCredentials => "Invalid credentials".to_string(),
                IdentityError::NoSession => "Session expired, please sign in again".to_string(),
                IdentityError::ProfileMissing(_) => "Account has no profile".to_string(),
                _ => "Authentication service error".to_string(),
            },
            Self::Store(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Validation(err) => err.to_string(),
            Self::NotFound(_) | Self::Forbidden(_) | Self::BadRequest(_) => self.to_string(),
        }
    }
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Identity(e) => Self::Identity(e),
            GuardError::Store(e) => Self::Store(e),
            GuardError::Encode(e) => Self::Internal(e.to_string()),
        }
    }
}

fn backend_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::NotFound { .. } => StatusCode::NOT_FOUND,
        BackendError::Status { status, .. } => match *status {
            401 => StatusCode::UNAUTHORIZED,
            403 => StatusCode::FORBIDDEN,
            404 => StatusCode::NOT_FOUND,
            400..=499 => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        },
        BackendError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BackendError::Http(_) | BackendError::Parse(_) | BackendError::Unavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rewoven_core::EntityKind;

    use super::*;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("listing".to_string());
        assert_eq!(err.to_string(), "Not found: listing");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::Identity(IdentityError::InvalidCredentials)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_backend_errors_through_cache_keep_their_status() {
        let missing = CacheError::Backend(Arc::new(BackendError::NotFound {
            kind: EntityKind::Listings,
            id: "abc".to_string(),
        }));
        assert_eq!(get_status(AppError::Cache(missing)), StatusCode::NOT_FOUND);

        let down = CacheError::Backend(Arc::new(BackendError::Unavailable("down".to_string())));
        assert_eq!(get_status(AppError::Cache(down)), StatusCode::BAD_GATEWAY);

        let rls = BackendError::Status {
            status: 403,
            message: "new row violates row-level security policy".to_string(),
        };
        assert_eq!(get_status(AppError::Backend(rls)), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::Backend(BackendError::Status {
            status: 500,
            message: "relation \"listings\" does not exist".to_string(),
        });
        assert_eq!(err.public_message(), "External service error");
    }
}

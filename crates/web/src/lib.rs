//! Rewoven web: backend-for-frontend of the textile-waste marketplace.
//!
//! The binary in `main.rs` only loads configuration, installs tracing and
//! Sentry, and serves [`app`]. Everything else lives here so it can be tested
//! in-process.
//!
//! # Subsystems
//!
//! - [`guard`] - Session guard: tri-state identity and role-gated routes
//! - [`cache`] - Per-user entity cache with coalesced loads and snapshots
//! - [`stats`] - Pure dashboard statistics
//! - [`assignments`] - Bulk request to factory routing
//! - [`supabase`] - Auth and REST clients for the managed backend

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod assignments;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod middleware;
pub mod query;
pub mod routes;
pub mod state;
pub mod stats;
pub mod store;
pub mod supabase;

use axum::{Router, middleware::from_fn};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::state::AppState;

/// Build the application with its full middleware stack.
pub fn app(state: AppState) -> Router {
    let session_layer = middleware::create_session_layer(state.secure_cookies());

    routes::routes()
        .layer(session_layer)
        .layer(from_fn(middleware::security_headers_middleware))
        .layer(from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        #[allow(clippy::cast_possible_truncation)]
                        span.record("latency_ms", latency.as_millis() as u64);
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

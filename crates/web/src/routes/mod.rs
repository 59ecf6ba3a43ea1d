//! HTTP route handlers.
//!
//! Every view is JSON. Gated routes answer `303 See Other` when the visitor
//! must go elsewhere and `503` with `Retry-After` while a session is still
//! being restored.
//!
//! # Route Structure
//!
//! ```text
//! GET  /                       - Public home
//! GET  /health                 - Health check
//! GET  /login                  - Login entry point
//! POST /login                  - Sign in (JSON credentials)
//! POST /logout                 - Sign out
//!
//! # Admin (role: admin)
//! GET    /admin                              - Marketplace statistics
//! GET    /admin/users                        - All profiles
//! GET    /admin/listings                     - All listings (filter/sort query)
//! DELETE /admin/listings/{id}                - Remove a listing
//! GET    /admin/transactions                 - All transactions
//! GET    /admin/bulk-requests                - Bulk requests with assignments
//! PUT    /admin/bulk-requests/{id}/assignment - Route a request to a factory
//! DELETE /admin/bulk-requests/{id}/assignment - Clear the route
//! GET    /admin/reports                      - All reports
//! PATCH  /admin/reports/{id}                 - Resolve a report
//! GET    /admin/packages                     - Subscription packages
//! POST   /admin/packages                     - Create a package
//! PATCH  /admin/packages/{id}                - Edit a package
//! DELETE /admin/packages/{id}                - Remove a package
//!
//! # Factory (role: factory)
//! GET    /factory                 - Own listings and sales summary
//! GET    /factory/listings        - Own listings (filter/sort query)
//! POST   /factory/listings        - Create a listing
//! PATCH  /factory/listings/{id}   - Edit an own listing
//! DELETE /factory/listings/{id}   - Remove an own listing
//! GET    /factory/orders          - Sales of own listings
//! GET    /factory/bulk-requests   - Open requests and those assigned here
//! GET    /factory/proposals       - Own proposals
//! POST   /factory/proposals       - Propose on an open request
//!
//! # Buyer (role: buyer)
//! GET    /buyer                   - Purchase summary
//! GET    /buyer/listings          - Live listings (filter/sort query)
//! GET    /buyer/orders            - Own orders
//! POST   /buyer/orders            - Buy from a live listing
//! GET    /buyer/bulk-requests     - Own bulk requests
//! POST   /buyer/bulk-requests     - Create a bulk request
//! GET    /buyer/proposals         - Proposals on own requests
//! PATCH  /buyer/proposals/{id}    - Accept or reject a proposal
//! POST   /buyer/reports           - File a report
//! ```
//!
//! Collection views accept `?refresh=true` to reload from the backend.

pub mod admin;
pub mod auth;
pub mod buyer;
pub mod factory;
pub mod home;
pub mod view;

use axum::{
    Router,
    routing::{get, post},
};

pub use view::{CollectionView, STALE_NOTICE};

use crate::state::AppState;

/// Create the full router, without middleware.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home::home))
        .route("/health", get(home::health))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", post(auth::logout))
        .nest("/admin", admin::routes())
        .nest("/factory", factory::routes())
        .nest("/buyer", buyer::routes())
}

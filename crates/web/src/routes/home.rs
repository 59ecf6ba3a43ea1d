//! Public home and health routes.

use axum::Json;
use rewoven_core::Role;
use serde::Serialize;

use crate::guard::LOGIN_PATH;

/// One role's entry point.
#[derive(Debug, Serialize)]
pub struct RoleEntry {
    pub role: Role,
    pub home: &'static str,
}

/// Public landing document.
#[derive(Debug, Serialize)]
pub struct HomeView {
    pub name: &'static str,
    pub tagline: &'static str,
    pub login: &'static str,
    pub roles: Vec<RoleEntry>,
}

/// Display the public home.
pub async fn home() -> Json<HomeView> {
    Json(HomeView {
        name: "Rewoven",
        tagline: "A marketplace for textile waste",
        login: LOGIN_PATH,
        roles: Role::ALL
            .iter()
            .map(|&role| RoleEntry {
                role,
                home: role.home_path(),
            })
            .collect(),
    })
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

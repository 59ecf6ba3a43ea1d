//! Integration tests for Rewoven.
//!
//! In-process fakes for the two remote collaborators, plus a [`TestApp`] that
//! wires them into the real router.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p rewoven-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `session_guard` - Restoration, role gates, sign-in and sign-out
//! - `cache_layer` - Coalescing, hydration, mutations, stale data
//! - `routes` - End-to-end navigation through the HTTP surface

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use chrono::Utc;
use rewoven_core::{
    BulkRequest, BulkRequestId, BulkRequestStatus, Email, EntityKind, Listing, ListingId,
    ListingStatus, Profile, Role, UserId,
};
use rewoven_web::backend::{AccessToken, BackendError, RemoteBackend};
use rewoven_web::config::GuardConfig;
use rewoven_web::identity::{Credentials, IdentityError, IdentityProvider, SessionUser, SignedIn};
use rewoven_web::state::{AppState, Services};
use rewoven_web::store::{KeyValueStore, MemoryStore};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Map, Value};
use tower::ServiceExt;

// =============================================================================
// Remote backend
// =============================================================================

/// In-memory tables behind the [`RemoteBackend`] trait.
#[derive(Default)]
pub struct FakeBackend {
    tables: Mutex<HashMap<EntityKind, Vec<Value>>>,
    list_calls: Mutex<HashMap<EntityKind, usize>>,
    mutation_calls: AtomicUsize,
    list_delay: Mutex<Duration>,
    fail_lists: AtomicBool,
    fail_mutations: AtomicBool,
    last_token: Mutex<Option<String>>,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the rows of `kind`.
    pub fn seed<T: Serialize>(&self, kind: EntityKind, rows: &[T]) {
        let rows = rows
            .iter()
            .map(|row| serde_json::to_value(row).unwrap())
            .collect();
        self.tables.lock().unwrap().insert(kind, rows);
    }

    /// Rows of `kind` as the backend holds them.
    #[must_use]
    pub fn rows(&self, kind: EntityKind) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `list` calls made for `kind`.
    #[must_use]
    pub fn list_calls(&self, kind: EntityKind) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Number of create, update and delete calls.
    #[must_use]
    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    /// Delay every `list` call by `delay`.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Make `list` calls fail until switched back.
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Make create, update and delete fail until switched back.
    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// The token sent with the most recent call.
    #[must_use]
    pub fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }

    fn record_token(&self, token: &AccessToken) {
        *self.last_token.lock().unwrap() = Some(token.expose().to_string());
    }

    fn check_mutation(&self, token: &AccessToken) -> Result<(), BackendError> {
        self.record_token(token);
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

#[async_trait]
impl RemoteBackend for FakeBackend {
    async fn list(&self, token: &AccessToken, kind: EntityKind) -> Result<Vec<Value>, BackendError> {
        self.record_token(token);
        *self.list_calls.lock().unwrap().entry(kind).or_insert(0) += 1;
        // Rows are read when the request arrives, like a real snapshot read.
        let rows = self.rows(kind);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("injected failure".to_string()));
        }
        Ok(rows)
    }

    async fn create(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        payload: Value,
    ) -> Result<Value, BackendError> {
        self.check_mutation(token)?;
        let Value::Object(mut row) = payload else {
            return Err(BackendError::Status {
                status: 400,
                message: "payload must be an object".to_string(),
            });
        };
        row.entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        row.insert("created_at".to_string(), serde_json::to_value(Utc::now()).unwrap());
        let row = Value::Object(row);
        self.tables
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        id: &str,
        patch: Value,
    ) -> Result<Value, BackendError> {
        self.check_mutation(token)?;
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .get_mut(&kind)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
            .ok_or_else(|| BackendError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        if let (Value::Object(target), Value::Object(changes)) = (&mut *row, patch) {
            merge(target, changes);
        }
        Ok(row.clone())
    }

    async fn delete(&self, token: &AccessToken, kind: EntityKind, id: &str) -> Result<(), BackendError> {
        self.check_mutation(token)?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(kind).or_default();
        let before = rows.len();
        rows.retain(|row| row_id(row) != Some(id));
        if rows.len() == before {
            return Err(BackendError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

fn merge(target: &mut Map<String, Value>, changes: Map<String, Value>) {
    for (key, value) in changes {
        if !value.is_null() {
            target.insert(key, value);
        }
    }
}

// =============================================================================
// Identity provider
// =============================================================================

struct Account {
    password: String,
    user: SessionUser,
}

/// Sessions and accounts behind the [`IdentityProvider`] trait.
#[derive(Default)]
pub struct FakeIdentity {
    accounts: Mutex<HashMap<String, Account>>,
    sessions: Mutex<HashMap<String, SessionUser>>,
    check_delay: Mutex<Duration>,
    fail_checks: AtomicBool,
    check_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl FakeIdentity {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an email + password account for `user`.
    pub fn add_account(&self, email: &str, password: &str, user: SessionUser) {
        self.accounts.lock().unwrap().insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user,
            },
        );
    }

    /// Open a session for `user` without going through sign-in.
    pub fn issue(&self, user: SessionUser) -> AccessToken {
        let token = format!("token-{}", uuid::Uuid::new_v4());
        self.sessions.lock().unwrap().insert(token.clone(), user);
        AccessToken::new(token)
    }

    /// Forget every session, as if they all expired.
    pub fn expire_all(&self) {
        self.sessions.lock().unwrap().clear();
    }

    /// Delay every session check by `delay`.
    pub fn set_check_delay(&self, delay: Duration) {
        *self.check_delay.lock().unwrap() = delay;
    }

    /// Make session checks fail with a transport error until switched back.
    pub fn fail_checks(&self, fail: bool) {
        self.fail_checks.store(fail, Ordering::SeqCst);
    }

    /// Number of `current_session` calls.
    #[must_use]
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    /// Number of `sign_out` calls.
    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    /// Number of open sessions.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_session(
        &self,
        token: &AccessToken,
    ) -> Result<Option<SessionUser>, IdentityError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.check_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_checks.load(Ordering::SeqCst) {
            return Err(IdentityError::Unavailable("injected failure".to_string()));
        }
        Ok(self.sessions.lock().unwrap().get(token.expose()).cloned())
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<SignedIn, IdentityError> {
        let user = {
            let accounts = self.accounts.lock().unwrap();
            let account = accounts
                .get(credentials.email.as_str())
                .ok_or(IdentityError::InvalidCredentials)?;
            if account.password != credentials.password.expose_secret() {
                return Err(IdentityError::InvalidCredentials);
            }
            account.user.clone()
        };
        let token = self.issue(user.clone());
        Ok(SignedIn { user, token })
    }

    async fn sign_out(&self, token: &AccessToken) -> Result<(), IdentityError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().remove(token.expose());
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A signed-in user of `role`.
#[must_use]
pub fn user(role: Option<Role>, name: &str) -> SessionUser {
    SessionUser {
        id: UserId::random(),
        role,
        display_name: name.to_string(),
        email: Some(format!("{}@rewoven.test", name.to_lowercase())),
    }
}

/// A listing of `factory` created `days_ago` days ago.
#[must_use]
pub fn listing(factory: UserId, status: ListingStatus, days_ago: i64) -> Listing {
    Listing {
        id: ListingId::random(),
        factory_id: factory,
        title: "Cotton offcuts".to_string(),
        description: None,
        material: "cotton".to_string(),
        quantity_kg: Decimal::from(100),
        price_per_kg: Decimal::from(2),
        status,
        location: Some("Tiruppur".to_string()),
        created_at: Utc::now() - chrono::Duration::days(days_ago),
    }
}

/// An open bulk request of `buyer`.
#[must_use]
pub fn bulk_request(buyer: UserId) -> BulkRequest {
    BulkRequest {
        id: BulkRequestId::random(),
        buyer_id: buyer,
        material: "denim".to_string(),
        quantity_kg: Decimal::from(500),
        max_price_per_kg: Some(Decimal::from(3)),
        deadline: None,
        notes: None,
        status: BulkRequestStatus::Open,
        created_at: Utc::now(),
    }
}

/// The profile row matching `user`.
#[must_use]
pub fn profile(user: &SessionUser) -> Profile {
    Profile {
        id: user.id,
        role: user.role,
        display_name: user.display_name.clone(),
        email: user.email.clone(),
        company_name: None,
        location: None,
        phone: None,
        created_at: Utc::now(),
    }
}

/// Decimal carried as a JSON string.
#[must_use]
pub fn dec(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

/// Guard settings that keep tests fast.
#[must_use]
pub fn fast_guard() -> GuardConfig {
    GuardConfig {
        identity_timeout: Duration::from_millis(300),
        restore_budget: Duration::from_millis(50),
        identity_ttl: Duration::from_secs(60),
    }
}

/// The real router over fake collaborators.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backend: Arc<FakeBackend>,
    pub identity: Arc<FakeIdentity>,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        Self::with_guard(fast_guard())
    }

    #[must_use]
    pub fn with_guard(guard: GuardConfig) -> Self {
        let backend = FakeBackend::new();
        let identity = FakeIdentity::new();
        let state = AppState::new(Services {
            provider: Arc::clone(&identity) as Arc<dyn IdentityProvider>,
            backend: Arc::clone(&backend) as Arc<dyn RemoteBackend>,
            durable: Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>,
            guard,
            cache_idle: Duration::from_secs(60),
            secure_cookies: false,
        });
        Self {
            router: rewoven_web::app(state.clone()),
            state,
            backend,
            identity,
        }
    }

    /// Send `request` through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Register `user` and sign in through `POST /login`.
    ///
    /// Returns the session cookie and the login response's redirect target.
    pub async fn sign_in(&self, user: &SessionUser) -> (String, String) {
        let email = user.email.clone().unwrap();
        self.identity.add_account(&email, "correct horse", user.clone());
        let body = serde_json::json!({ "email": email, "password": "correct horse" });
        let response = self
            .send(
                Request::post("/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await;
        let cookie = session_cookie(&response).unwrap();
        (cookie, location(&response).unwrap())
    }

    /// `GET path` with an optional session cookie.
    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::get(path);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    /// `method path` with a JSON body and a session cookie.
    pub async fn send_json(
        &self,
        method: &str,
        path: &str,
        cookie: &str,
        body: &Value,
    ) -> Response<Body> {
        self.send(
            Request::builder()
                .method(method)
                .uri(path)
                .header(header::COOKIE, cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// `name=value` of the session cookie set by `response`.
#[must_use]
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(rewoven_web::middleware::SESSION_COOKIE_NAME))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

/// `Location` header of a redirect.
#[must_use]
pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Response body as JSON.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Parse a test email address.
#[must_use]
pub fn email(s: &str) -> Email {
    Email::parse(s).unwrap()
}

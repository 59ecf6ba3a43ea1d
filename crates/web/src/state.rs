//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::assignments::AssignmentBook;
use crate::backend::RemoteBackend;
use crate::cache::CacheRegistry;
use crate::config::{GuardConfig, WebConfig};
use crate::guard::SessionGuard;
use crate::identity::IdentityProvider;
use crate::middleware::SESSION_EXPIRY;
use crate::store::{ExpiringStore, FileStore, KeyValueStore, StoreError};
use crate::supabase::{AuthClient, RestClient};

/// Upper bound on snapshot entries held across all users.
const MAX_SNAPSHOT_ENTRIES: u64 = 100_000;

/// Everything the state is assembled from.
///
/// Lets tests swap the Supabase clients and the durable store for fakes.
pub struct Services {
    pub provider: Arc<dyn IdentityProvider>,
    pub backend: Arc<dyn RemoteBackend>,
    /// Durable-scope store (assignment map).
    pub durable: Arc<dyn KeyValueStore>,
    pub guard: GuardConfig,
    /// Idle lifetime of a user's in-memory cache.
    pub cache_idle: Duration,
    pub secure_cookies: bool,
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    guard: SessionGuard,
    caches: CacheRegistry,
    assignments: AssignmentBook,
    secure_cookies: bool,
}

impl AppState {
    /// Assemble the state and start forwarding identity changes to the
    /// cache registry. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(services: Services) -> Self {
        let guard = SessionGuard::new(services.provider, services.guard);
        let snapshots: Arc<dyn KeyValueStore> = Arc::new(ExpiringStore::new(
            SESSION_EXPIRY,
            MAX_SNAPSHOT_ENTRIES,
        ));
        let caches = CacheRegistry::new(services.backend, snapshots, services.cache_idle);
        caches.listen(guard.changes());

        Self {
            inner: Arc::new(AppStateInner {
                guard,
                caches,
                assignments: AssignmentBook::new(services.durable),
                secure_cookies: services.secure_cookies,
            }),
        }
    }

    /// Build the production state: Supabase clients and a file-backed
    /// durable store under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub async fn from_config(config: &WebConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::new();
        let rest = RestClient::with_client(http.clone(), &config.supabase);
        let auth = AuthClient::with_client(http, &config.supabase, rest.clone());
        let durable = FileStore::open(&config.data_dir).await?;

        Ok(Self::new(Services {
            provider: Arc::new(auth),
            backend: Arc::new(rest),
            durable: Arc::new(durable),
            guard: config.guard,
            cache_idle: config.cache_idle,
            secure_cookies: config.secure_cookies(),
        }))
    }

    /// Get a reference to the session guard.
    #[must_use]
    pub fn guard(&self) -> &SessionGuard {
        &self.inner.guard
    }

    /// Get a reference to the per-user cache registry.
    #[must_use]
    pub fn caches(&self) -> &CacheRegistry {
        &self.inner.caches
    }

    /// Get a reference to the bulk request assignment book.
    #[must_use]
    pub fn assignments(&self) -> &AssignmentBook {
        &self.inner.assignments
    }

    /// Whether session cookies carry the `Secure` attribute.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.inner.secure_cookies
    }
}

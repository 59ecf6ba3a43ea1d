//! Key-value stores for client-side persistence.
//!
//! The marketplace persists two kinds of state outside the remote backend:
//!
//! - **Session scope** - the auth record (token + role hint) and entity
//!   collection snapshots. Lives as long as the browsing session.
//! - **Durable scope** - small cross-session conveniences such as the bulk
//!   request assignment map.
//!
//! Both are opaque `key -> serialized blob` stores behind [`KeyValueStore`], so
//! the guard and the cache never know which mechanism backs them.
//!
//! | Store | Scope | Backing |
//! |-------|-------|---------|
//! | [`SessionStore`] | session | `tower-sessions` record of the caller |
//! | [`ExpiringStore`] | session | `moka`, entries expire after idling |
//! | [`FileStore`] | durable | one JSON file per key |
//! | [`MemoryStore`] | either | process memory (tests, local runs) |
//! | [`ScopedStore`] | - | key prefix over another store |

mod file;
mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use thiserror::Error;
use tokio::sync::RwLock;

pub use file::FileStore;
pub use session::SessionStore;

/// Errors raised by a key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The HTTP session could not be read or written.
    #[error("session store error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// The filesystem rejected a read or write.
    #[error("file store error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded into a blob.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Opaque `key -> blob` persistence.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `blob` under `key`, replacing any previous value.
    async fn set(&self, key: &str, blob: String) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// =============================================================================
// MemoryStore
// =============================================================================

/// Process-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, blob: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), blob);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

// =============================================================================
// ExpiringStore
// =============================================================================

/// Session-scope store whose entries vanish after idling.
///
/// Holds collection snapshots on the server side; an entry untouched for the
/// session lifetime is dropped, matching a browser closing its session.
#[derive(Clone)]
pub struct ExpiringStore {
    entries: Cache<String, String>,
}

impl ExpiringStore {
    /// Create a store whose entries expire after `idle` without access.
    #[must_use]
    pub fn new(idle: Duration, max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .time_to_idle(idle)
                .build(),
        }
    }
}

#[async_trait]
impl KeyValueStore for ExpiringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).await)
    }

    async fn set(&self, key: &str, blob: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), blob).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

// =============================================================================
// ScopedStore
// =============================================================================

/// Prefixes every key, partitioning a shared store per owner.
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl ScopedStore {
    /// Scope `inner` under `prefix`.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl KeyValueStore for ScopedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.key(key)).await
    }

    async fn set(&self, key: &str, blob: String) -> Result<(), StoreError> {
        self.inner.set(&self.key(key), blob).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(&self.key(key)).await
    }
}

//! Per-user entity caches.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use rewoven_core::{EntityKind, UserId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EntityCache, snapshot_key};
use crate::backend::{AccessToken, RemoteBackend};
use crate::guard::IdentityChange;
use crate::store::{KeyValueStore, ScopedStore};

const MAX_CACHED_USERS: u64 = 10_000;

/// Hands out one [`EntityCache`] per signed-in user.
///
/// Each cache writes its snapshots through a [`ScopedStore`] keyed by the
/// user id, so one user's snapshots are never visible to another.
#[derive(Clone)]
pub struct CacheRegistry {
    inner: Arc<CacheRegistryInner>,
}

struct CacheRegistryInner {
    backend: Arc<dyn RemoteBackend>,
    snapshots: Arc<dyn KeyValueStore>,
    caches: Cache<UserId, EntityCache>,
}

impl CacheRegistry {
    /// Caches idle for longer than `idle` are dropped; their snapshots remain.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        snapshots: Arc<dyn KeyValueStore>,
        idle: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheRegistryInner {
                backend,
                snapshots,
                caches: Cache::builder()
                    .max_capacity(MAX_CACHED_USERS)
                    .time_to_idle(idle)
                    .build(),
            }),
        }
    }

    /// The cache of `user`, acting with `token`.
    ///
    /// A user keeps one cache across devices; when a request arrives with a
    /// different token the cache switches to it and keeps its collections.
    pub async fn cache_for(&self, user: UserId, token: &AccessToken) -> EntityCache {
        let cache = self
            .inner
            .caches
            .get_with(user, async { self.build(user, token) })
            .await;
        if !cache.uses_token(token) {
            debug!(user_id = %user, "Token changed; switching entity cache token");
            cache.set_token(token);
        }
        cache
    }

    /// Whether a cache is held for `user`.
    pub async fn contains(&self, user: UserId) -> bool {
        self.inner.caches.get(&user).await.is_some()
    }

    /// Drop the in-memory cache of `user`; snapshots stay for the next cache.
    pub async fn evict(&self, user: UserId) {
        self.inner.caches.invalidate(&user).await;
    }

    /// Drop the cache of `user` and every snapshot it wrote.
    pub async fn forget(&self, user: UserId) {
        self.evict(user).await;
        let scoped = self.scoped(user);
        for kind in EntityKind::ALL {
            if let Err(e) = scoped.remove(&snapshot_key(kind)).await {
                warn!(user_id = %user, kind = %kind, error = %e, "Failed to remove snapshot");
            }
        }
    }

    /// Follow identity changes: a new sign-in gets a fresh cache, a sign-out
    /// forgets everything held for the user.
    pub fn listen(&self, mut changes: broadcast::Receiver<IdentityChange>) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(IdentityChange::SignedIn(user)) => registry.evict(user).await,
                    Ok(IdentityChange::SignedOut(user)) => registry.forget(user).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Identity change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn scoped(&self, user: UserId) -> ScopedStore {
        ScopedStore::new(Arc::clone(&self.inner.snapshots), format!("user:{user}:"))
    }

    fn build(&self, user: UserId, token: &AccessToken) -> EntityCache {
        EntityCache::new(
            Arc::clone(&self.inner.backend),
            token.clone(),
            Arc::new(self.scoped(user)),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::backend::BackendError;
    use crate::store::MemoryStore;

    struct EmptyBackend;

    #[async_trait]
    impl RemoteBackend for EmptyBackend {
        async fn list(&self, _: &AccessToken, _: EntityKind) -> Result<Vec<Value>, BackendError> {
            Ok(Vec::new())
        }
        async fn create(&self, _: &AccessToken, _: EntityKind, p: Value) -> Result<Value, BackendError> {
            Ok(p)
        }
        async fn update(&self, _: &AccessToken, _: EntityKind, _: &str, p: Value) -> Result<Value, BackendError> {
            Ok(p)
        }
        async fn delete(&self, _: &AccessToken, _: EntityKind, _: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn registry(snapshots: &Arc<MemoryStore>) -> CacheRegistry {
        CacheRegistry::new(
            Arc::new(EmptyBackend),
            Arc::clone(snapshots) as Arc<dyn KeyValueStore>,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_same_user_same_token_shares_cache() {
        let registry = registry(&Arc::new(MemoryStore::new()));
        let user = UserId::random();
        let token = AccessToken::new("a");

        let first = registry.cache_for(user, &token).await;
        let second = registry.cache_for(user, &token).await;
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
    }

    #[tokio::test]
    async fn test_new_token_keeps_cache() {
        let registry = registry(&Arc::new(MemoryStore::new()));
        let user = UserId::random();

        let old = registry.cache_for(user, &AccessToken::new("a")).await;
        let new = registry.cache_for(user, &AccessToken::new("b")).await;
        assert!(Arc::ptr_eq(&old.inner, &new.inner));
        assert!(new.uses_token(&AccessToken::new("b")));
    }

    #[tokio::test]
    async fn test_forget_removes_only_that_users_snapshots() {
        let snapshots = Arc::new(MemoryStore::new());
        let registry = registry(&snapshots);
        let alice = UserId::random();
        let bob = UserId::random();

        snapshots
            .set(&format!("user:{alice}:cache:listings"), "[]".to_string())
            .await
            .unwrap();
        snapshots
            .set(&format!("user:{bob}:cache:listings"), "[]".to_string())
            .await
            .unwrap();
        registry.cache_for(alice, &AccessToken::new("a")).await;

        registry.forget(alice).await;
        assert!(!registry.contains(alice).await);
        assert!(snapshots.get(&format!("user:{alice}:cache:listings")).await.unwrap().is_none());
        assert!(snapshots.get(&format!("user:{bob}:cache:listings")).await.unwrap().is_some());
    }
}

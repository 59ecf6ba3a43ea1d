//! Entity cache layer.
//!
//! One [`EntityCache`] per signed-in user holds a collection per entity kind.
//! Reads are served from memory once populated; the first read of a kind
//! hydrates from the persisted snapshot (if any) and kicks off a remote load.
//! Concurrent readers of the same kind share a single in-flight load, which
//! runs as its own task so that a reader giving up never cancels it.
//!
//! Mutations go to the remote backend first and only touch memory once the
//! backend confirms them, so a failed mutation leaves the cache exactly as it
//! was.
//!
//! # Slot state
//!
//! | data | inflight | last_error | [`Load`] |
//! |------|----------|------------|----------|
//! | some | any      | any        | `Ready` (stale-but-available when an error is recorded) |
//! | none | some     | any        | `Loading` |
//! | none | none     | some       | `Failed` |
//! | none | none     | none       | `Loading` (not requested yet) |

mod collection;
mod registry;
mod snapshot;

pub use collection::{CachedCollection, Source};
pub use registry::CacheRegistry;
pub use snapshot::{SNAPSHOT_VERSION, snapshot_key};

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rewoven_core::{
    BulkRequest, Entity, EntityKind, Listing, Package, Profile, Proposal, Report, Transaction,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::backend::{AccessToken, BackendError, RemoteBackend};
use crate::stats::{self, MarketplaceStats, StatsInput};
use crate::store::KeyValueStore;

/// Errors surfaced by cache operations.
///
/// Cloneable so one failed load can be handed to every coalesced caller.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error(transparent)]
    Backend(Arc<BackendError>),

    #[error("could not decode {kind} row: {message}")]
    Decode { kind: EntityKind, message: String },

    #[error("{0} load was aborted")]
    Aborted(EntityKind),
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        Self::Backend(Arc::new(err))
    }
}

/// Load state of one kind.
#[derive(Debug, Clone)]
pub enum Load<E> {
    Loading,
    Ready(Arc<CachedCollection<E>>),
    Failed(CacheError),
}

type LoadResult<E> = Result<Arc<CachedCollection<E>>, CacheError>;
type SharedLoad<E> = Shared<BoxFuture<'static, LoadResult<E>>>;

/// Per-kind cache slot.
pub struct Slot<E: Entity> {
    state: Mutex<SlotState<E>>,
}

struct SlotState<E: Entity> {
    data: Option<Arc<CachedCollection<E>>>,
    inflight: Option<SharedLoad<E>>,
    last_error: Option<CacheError>,
    hydrated: bool,
}

impl<E: Entity> Default for Slot<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState {
                data: None,
                inflight: None,
                last_error: None,
                hydrated: false,
            }),
        }
    }
}

/// One slot per entity kind.
#[derive(Default)]
pub struct Collections {
    users: Slot<Profile>,
    listings: Slot<Listing>,
    transactions: Slot<Transaction>,
    bulk_requests: Slot<BulkRequest>,
    proposals: Slot<Proposal>,
    packages: Slot<Package>,
    reports: Slot<Report>,
}

/// An entity the cache knows where to keep.
pub trait Cached: Entity {
    fn slot(collections: &Collections) -> &Slot<Self>;
}

macro_rules! cached {
    ($($entity:ty => $field:ident),+ $(,)?) => {
        $(
            impl Cached for $entity {
                fn slot(collections: &Collections) -> &Slot<Self> {
                    &collections.$field
                }
            }
        )+
    };
}

cached! {
    Profile => users,
    Listing => listings,
    Transaction => transactions,
    BulkRequest => bulk_requests,
    Proposal => proposals,
    Package => packages,
    Report => reports,
}

/// Read-through cache of one user's view of the backend.
#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<EntityCacheInner>,
}

struct EntityCacheInner {
    backend: Arc<dyn RemoteBackend>,
    token: ArcSwap<AccessToken>,
    snapshots: Arc<dyn KeyValueStore>,
    collections: Collections,
}

impl EntityCache {
    /// Create an empty cache acting with `token`.
    ///
    /// `snapshots` must already be scoped to the token's user.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        token: AccessToken,
        snapshots: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            inner: Arc::new(EntityCacheInner {
                backend,
                token: ArcSwap::from_pointee(token),
                snapshots,
                collections: Collections::default(),
            }),
        }
    }

    /// Whether this cache acts with `token`.
    #[must_use]
    pub fn uses_token(&self, token: &AccessToken) -> bool {
        self.inner.token.load().expose() == token.expose()
    }

    /// Act with `token` from now on. Held collections are kept.
    pub fn set_token(&self, token: &AccessToken) {
        self.inner.token.store(Arc::new(token.clone()));
    }

    fn slot<E: Cached>(&self) -> &Slot<E> {
        E::slot(&self.inner.collections)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get the collection of `E`.
    ///
    /// Returns held data without contacting the backend. Otherwise joins or
    /// starts the remote load; on the first call a valid snapshot is returned
    /// right away while that load continues in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is held and the remote load fails.
    pub async fn fetch<E: Cached>(&self) -> Result<Arc<CachedCollection<E>>, CacheError> {
        let mut state = self.slot::<E>().state.lock().await;
        if let Some(data) = &state.data {
            return Ok(Arc::clone(data));
        }
        if let Some(load) = state.inflight.clone() {
            drop(state);
            return load.await;
        }

        let hydrated = if state.hydrated {
            None
        } else {
            state.hydrated = true;
            self.read_snapshot::<E>().await
        };
        let load = self.start_load(&mut state);

        if let Some(collection) = hydrated {
            debug!(kind = %E::KIND, items = collection.len(), "Hydrated from snapshot");
            let collection = Arc::new(collection);
            state.data = Some(Arc::clone(&collection));
            return Ok(collection);
        }
        drop(state);
        load.await
    }

    /// Reload `E` from the backend, joining a load already in flight.
    ///
    /// On failure the held data (if any) stays available and the error is
    /// recorded for [`last_error`](Self::last_error).
    ///
    /// # Errors
    ///
    /// Returns the remote failure.
    pub async fn refresh<E: Cached>(&self) -> Result<Arc<CachedCollection<E>>, CacheError> {
        let mut state = self.slot::<E>().state.lock().await;
        let load = match state.inflight.clone() {
            Some(load) => load,
            None => self.start_load(&mut state),
        };
        drop(state);
        load.await
    }

    /// Current load state of `E`.
    pub async fn state<E: Cached>(&self) -> Load<E> {
        let state = self.slot::<E>().state.lock().await;
        match (&state.data, &state.inflight, &state.last_error) {
            (Some(data), _, _) => Load::Ready(Arc::clone(data)),
            (None, None, Some(error)) => Load::Failed(error.clone()),
            _ => Load::Loading,
        }
    }

    /// Error of the most recent failed load of `E`, cleared by the next success.
    pub async fn last_error<E: Cached>(&self) -> Option<CacheError> {
        self.slot::<E>().state.lock().await.last_error.clone()
    }

    /// Derive marketplace statistics from the collections already held.
    ///
    /// Never contacts the backend; kinds not loaded yet count as empty.
    pub async fn stats(&self, now: DateTime<Utc>) -> MarketplaceStats {
        let (profiles, listings, transactions, bulk_requests, proposals, packages, reports) = tokio::join!(
            self.held::<Profile>(),
            self.held::<Listing>(),
            self.held::<Transaction>(),
            self.held::<BulkRequest>(),
            self.held::<Proposal>(),
            self.held::<Package>(),
            self.held::<Report>(),
        );
        stats::compute(
            &StatsInput {
                profiles: held_items(profiles.as_ref()),
                listings: held_items(listings.as_ref()),
                transactions: held_items(transactions.as_ref()),
                bulk_requests: held_items(bulk_requests.as_ref()),
                proposals: held_items(proposals.as_ref()),
                packages: held_items(packages.as_ref()),
                reports: held_items(reports.as_ref()),
            },
            now,
        )
    }

    /// Load every kind, as [`fetch`](Self::fetch) would, then derive
    /// marketplace statistics from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if any collection cannot be loaded.
    pub async fn load_stats(&self, now: DateTime<Utc>) -> Result<MarketplaceStats, CacheError> {
        let (profiles, listings, transactions, bulk_requests, proposals, packages, reports) = tokio::try_join!(
            self.fetch::<Profile>(),
            self.fetch::<Listing>(),
            self.fetch::<Transaction>(),
            self.fetch::<BulkRequest>(),
            self.fetch::<Proposal>(),
            self.fetch::<Package>(),
            self.fetch::<Report>(),
        )?;
        Ok(stats::compute(
            &StatsInput {
                profiles: profiles.items(),
                listings: listings.items(),
                transactions: transactions.items(),
                bulk_requests: bulk_requests.items(),
                proposals: proposals.items(),
                packages: packages.items(),
                reports: reports.items(),
            },
            now,
        ))
    }

    async fn held<E: Cached>(&self) -> Option<Arc<CachedCollection<E>>> {
        self.slot::<E>().state.lock().await.data.clone()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a row and add it to the held collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the row; memory is untouched.
    #[instrument(skip(self, draft), fields(kind = %E::KIND))]
    pub async fn add<E: Cached>(&self, draft: E::Draft) -> Result<E, CacheError> {
        let payload = encode_payload::<E, _>(&draft)?;
        let row = self
            .inner
            .backend
            .create(&self.inner.token.load_full(), E::KIND, payload)
            .await?;
        let created: E = self.decode_confirmed(row).await?;
        self.apply::<E>(|current| current.with_upserted(created.clone()))
            .await;
        Ok(created)
    }

    /// Apply a partial update and merge the result into the held collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the update; memory is untouched.
    #[instrument(skip(self, patch), fields(kind = %E::KIND))]
    pub async fn update<E: Cached>(&self, id: E::Id, patch: E::Patch) -> Result<E, CacheError> {
        let payload = encode_payload::<E, _>(&patch)?;
        let row = self
            .inner
            .backend
            .update(&self.inner.token.load_full(), E::KIND, &id.to_string(), payload)
            .await?;
        let updated: E = self.decode_confirmed(row).await?;
        self.apply::<E>(|current| current.with_upserted(updated.clone()))
            .await;
        Ok(updated)
    }

    /// Delete a row and drop it from the held collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the delete; memory is untouched.
    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub async fn delete<E: Cached>(&self, id: E::Id) -> Result<(), CacheError> {
        self.inner
            .backend
            .delete(&self.inner.token.load_full(), E::KIND, &id.to_string())
            .await?;
        self.apply::<E>(|current| current.without(id)).await;
        Ok(())
    }

    /// Fold a confirmed remote change into memory and the snapshot.
    async fn apply<E: Cached>(
        &self,
        change: impl FnOnce(&CachedCollection<E>) -> CachedCollection<E> + Send,
    ) {
        let slot = self.slot::<E>();

        // A load that started before the mutation must not overwrite it later.
        let pending = slot.state.lock().await.inflight.clone();
        if let Some(load) = pending {
            let _ = load.await;
        }

        let mut state = slot.state.lock().await;
        match state.data.as_deref().map(change) {
            Some(changed) => {
                let changed = Arc::new(changed);
                self.write_snapshot(&changed).await;
                state.data = Some(changed);
            }
            None => self.remove_snapshot(E::KIND).await,
        }
    }

    /// Decode a row the backend already committed.
    ///
    /// If it cannot be decoded the held collection no longer matches the
    /// backend, so it is dropped and reloaded on the next read.
    async fn decode_confirmed<E: Cached>(&self, row: Value) -> Result<E, CacheError> {
        match serde_json::from_value(row) {
            Ok(entity) => Ok(entity),
            Err(e) => {
                warn!(kind = %E::KIND, error = %e, "Committed row could not be decoded");
                let mut state = self.slot::<E>().state.lock().await;
                state.data = None;
                state.hydrated = true;
                self.remove_snapshot(E::KIND).await;
                Err(CacheError::Decode {
                    kind: E::KIND,
                    message: e.to_string(),
                })
            }
        }
    }

    // =========================================================================
    // Remote loads
    // =========================================================================

    /// Spawn the remote load for `E` and record it as in flight.
    fn start_load<E: Cached>(&self, state: &mut SlotState<E>) -> SharedLoad<E> {
        let cache = self.clone();
        let task = tokio::spawn(async move { cache.load_remote::<E>().await });
        let load = async move { task.await.map_err(|_| CacheError::Aborted(E::KIND))? }
            .boxed()
            .shared();
        state.inflight = Some(load.clone());
        load
    }

    #[instrument(skip(self), fields(kind = %E::KIND))]
    async fn load_remote<E: Cached>(&self) -> LoadResult<E> {
        let result = self
            .inner
            .backend
            .list(&self.inner.token.load_full(), E::KIND)
            .await
            .map(decode_rows::<E>);

        let mut state = self.slot::<E>().state.lock().await;
        state.inflight = None;
        match result {
            Ok(items) => {
                let collection = Arc::new(CachedCollection::new(items, Utc::now(), Source::Remote));
                debug!(items = collection.len(), "Loaded from backend");
                self.write_snapshot(&collection).await;
                state.data = Some(Arc::clone(&collection));
                state.last_error = None;
                Ok(collection)
            }
            Err(e) => {
                warn!(error = %e, stale = state.data.is_some(), "Remote load failed");
                let error = CacheError::from(e);
                state.last_error = Some(error.clone());
                Err(error)
            }
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn read_snapshot<E: Cached>(&self) -> Option<CachedCollection<E>> {
        match self.inner.snapshots.get(&snapshot_key(E::KIND)).await {
            Ok(blob) => blob.as_deref().and_then(snapshot::decode),
            Err(e) => {
                warn!(kind = %E::KIND, error = %e, "Failed to read snapshot");
                None
            }
        }
    }

    async fn write_snapshot<E: Cached>(&self, collection: &CachedCollection<E>) {
        let blob = match snapshot::encode(collection) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(kind = %E::KIND, error = %e, "Failed to encode snapshot");
                return;
            }
        };
        if let Err(e) = self.inner.snapshots.set(&snapshot_key(E::KIND), blob).await {
            warn!(kind = %E::KIND, error = %e, "Failed to write snapshot");
        }
    }

    async fn remove_snapshot(&self, kind: EntityKind) {
        if let Err(e) = self.inner.snapshots.remove(&snapshot_key(kind)).await {
            warn!(kind = %kind, error = %e, "Failed to remove snapshot");
        }
    }
}

fn held_items<E: Entity>(held: Option<&Arc<CachedCollection<E>>>) -> &[E] {
    match held {
        Some(collection) => collection.items(),
        None => &[],
    }
}

fn encode_payload<E: Entity, T: serde::Serialize>(payload: &T) -> Result<Value, CacheError> {
    serde_json::to_value(payload).map_err(|e| CacheError::Decode {
        kind: E::KIND,
        message: e.to_string(),
    })
}

/// Decode listed rows, skipping any that do not match the entity shape.
fn decode_rows<E: Entity>(rows: Vec<Value>) -> Vec<E> {
    let total = rows.len();
    let items: Vec<E> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect();
    if items.len() < total {
        warn!(kind = %E::KIND, skipped = total - items.len(), "Skipped undecodable rows");
    }
    items
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rewoven_core::{PackageDraft, PackageId, PackagePatch};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    /// Serves a fixed package table and counts list calls.
    #[derive(Default)]
    struct PackageTable {
        rows: std::sync::Mutex<Vec<Value>>,
        lists: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    fn row(id: PackageId, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "price": "49.00",
            "duration_days": 30,
            "created_at": "2025-01-01T00:00:00Z"
        })
    }

    #[async_trait]
    impl RemoteBackend for PackageTable {
        async fn list(&self, _: &AccessToken, _: EntityKind) -> Result<Vec<Value>, BackendError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("offline".to_string()));
            }
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn create(&self, _: &AccessToken, _: EntityKind, payload: Value) -> Result<Value, BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("offline".to_string()));
            }
            let mut created = payload;
            created["id"] = json!(PackageId::random());
            created["created_at"] = json!("2025-01-02T00:00:00Z");
            self.rows.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn update(&self, _: &AccessToken, kind: EntityKind, id: &str, patch: Value) -> Result<Value, BackendError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|r| r["id"] == id)
                .ok_or_else(|| BackendError::NotFound { kind, id: id.to_string() })?;
            for (k, v) in patch.as_object().unwrap() {
                row[k] = v.clone();
            }
            Ok(row.clone())
        }

        async fn delete(&self, _: &AccessToken, kind: EntityKind, id: &str) -> Result<(), BackendError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|r| r["id"] != id);
            if rows.len() == before {
                return Err(BackendError::NotFound { kind, id: id.to_string() });
            }
            Ok(())
        }
    }

    fn cache(table: &Arc<PackageTable>, snapshots: &Arc<MemoryStore>) -> EntityCache {
        EntityCache::new(
            Arc::clone(table) as Arc<dyn RemoteBackend>,
            AccessToken::new("token"),
            Arc::clone(snapshots) as Arc<dyn KeyValueStore>,
        )
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_memory() {
        let table = Arc::new(PackageTable::default());
        table.rows.lock().unwrap().push(row(PackageId::random(), "basic"));
        let cache = cache(&table, &Arc::new(MemoryStore::new()));

        let first = cache.fetch::<Package>().await.unwrap();
        let second = cache.fetch::<Package>().await.unwrap();
        assert_eq!(first.items(), second.items());
        assert_eq!(table.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_requested_reads_as_loading() {
        let table = Arc::new(PackageTable::default());
        let cache = cache(&table, &Arc::new(MemoryStore::new()));
        assert!(matches!(cache.state::<Package>().await, Load::Loading));
    }

    #[tokio::test]
    async fn test_failed_first_load_reads_as_failed() {
        let table = Arc::new(PackageTable::default());
        table.fail.store(true, Ordering::SeqCst);
        let cache = cache(&table, &Arc::new(MemoryStore::new()));

        assert!(cache.fetch::<Package>().await.is_err());
        assert!(matches!(cache.state::<Package>().await, Load::Failed(_)));
    }

    #[tokio::test]
    async fn test_successful_load_writes_snapshot() {
        let table = Arc::new(PackageTable::default());
        table.rows.lock().unwrap().push(row(PackageId::random(), "basic"));
        let snapshots = Arc::new(MemoryStore::new());
        cache(&table, &snapshots).fetch::<Package>().await.unwrap();

        let blob = snapshots.get("cache:packages").await.unwrap().unwrap();
        assert!(blob.contains("basic"));
    }

    #[tokio::test]
    async fn test_add_update_delete_keep_memory_in_step() {
        let table = Arc::new(PackageTable::default());
        let cache = cache(&table, &Arc::new(MemoryStore::new()));
        cache.fetch::<Package>().await.unwrap();

        let created = cache
            .add::<Package>(PackageDraft {
                name: "Starter".to_string(),
                description: None,
                price: Decimal::new(1900, 2),
                duration_days: 30,
                listing_limit: Some(5),
            })
            .await
            .unwrap();
        let held = cache.fetch::<Package>().await.unwrap();
        assert_eq!(held.get(created.id).unwrap().name, "Starter");
        assert_eq!(held.source(), Source::Memory);

        cache
            .update::<Package>(
                created.id,
                PackagePatch {
                    is_active: Some(false),
                    ..PackagePatch::default()
                },
            )
            .await
            .unwrap();
        assert!(!cache.fetch::<Package>().await.unwrap().get(created.id).unwrap().is_active);

        cache.delete::<Package>(created.id).await.unwrap();
        assert!(cache.fetch::<Package>().await.unwrap().is_empty());
        assert_eq!(table.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutation_on_unpopulated_kind_clears_snapshot() {
        let table = Arc::new(PackageTable::default());
        let snapshots = Arc::new(MemoryStore::new());
        snapshots
            .set("cache:packages", "stale".to_string())
            .await
            .unwrap();
        let cache = cache(&table, &snapshots);

        cache
            .add::<Package>(PackageDraft {
                name: "Starter".to_string(),
                description: None,
                price: Decimal::ONE,
                duration_days: 7,
                listing_limit: None,
            })
            .await
            .unwrap();
        assert!(snapshots.get("cache:packages").await.unwrap().is_none());
        assert_eq!(table.lists.load(Ordering::SeqCst), 0);
    }
}

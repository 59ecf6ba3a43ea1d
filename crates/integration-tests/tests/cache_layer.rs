//! Entity cache behavior against a fake backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rewoven_core::{EntityKind, Listing, ListingDraft, ListingPatch, ListingStatus, Role, UserId};
use rewoven_integration_tests::{FakeBackend, bulk_request, listing, profile, user};
use rewoven_web::backend::{AccessToken, RemoteBackend};
use rewoven_web::cache::{CacheError, CacheRegistry, EntityCache, Load, Source, snapshot_key};
use rewoven_web::store::{KeyValueStore, MemoryStore};
use rust_decimal::Decimal;

fn entity_cache(backend: &Arc<FakeBackend>, snapshots: &Arc<MemoryStore>) -> EntityCache {
    EntityCache::new(
        Arc::clone(backend) as Arc<dyn RemoteBackend>,
        AccessToken::new("token"),
        Arc::clone(snapshots) as Arc<dyn KeyValueStore>,
    )
}

fn seeded(rows: &[Listing]) -> (Arc<FakeBackend>, Arc<MemoryStore>) {
    let backend = FakeBackend::new();
    backend.seed(EntityKind::Listings, rows);
    (backend, Arc::new(MemoryStore::new()))
}

fn draft(factory: UserId) -> ListingDraft {
    ListingDraft {
        factory_id: factory,
        title: "Denim scraps".to_string(),
        description: None,
        material: "denim".to_string(),
        quantity_kg: Decimal::from(40),
        price_per_kg: Decimal::from(3),
        status: ListingStatus::Live,
        location: None,
    }
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_populated_fetch_makes_no_remote_call() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    let cache = entity_cache(&backend, &snapshots);

    let first = cache.fetch::<Listing>().await.unwrap();
    let second = cache.fetch::<Listing>().await.unwrap();

    assert_eq!(first.items(), second.items());
    assert_eq!(first.source(), Source::Remote);
    assert_eq!(backend.list_calls(EntityKind::Listings), 1);
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_load() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    backend.set_list_delay(Duration::from_millis(100));
    let cache = entity_cache(&backend, &snapshots);

    let (a, b, c) = tokio::join!(
        cache.fetch::<Listing>(),
        cache.fetch::<Listing>(),
        cache.fetch::<Listing>(),
    );

    assert_eq!(backend.list_calls(EntityKind::Listings), 1);
    let a = a.unwrap();
    assert_eq!(a.items(), b.unwrap().items());
    assert_eq!(a.items(), c.unwrap().items());
}

#[tokio::test]
async fn test_abandoned_fetch_still_populates_the_cache() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    backend.set_list_delay(Duration::from_millis(100));
    let cache = entity_cache(&backend, &snapshots);

    // The caller navigates away long before the load finishes.
    let gave_up = tokio::time::timeout(Duration::from_millis(10), cache.fetch::<Listing>()).await;
    assert!(gave_up.is_err());
    assert!(matches!(cache.state::<Listing>().await, Load::Loading));

    tokio::time::sleep(Duration::from_millis(200)).await;
    match cache.state::<Listing>().await {
        Load::Ready(collection) => assert_eq!(collection.len(), 1),
        other => panic!("expected ready, got {other:?}"),
    }
    assert_eq!(backend.list_calls(EntityKind::Listings), 1);
}

#[tokio::test]
async fn test_unrequested_kind_reads_as_loading() {
    let (backend, snapshots) = seeded(&[]);
    let cache = entity_cache(&backend, &snapshots);
    assert!(matches!(cache.state::<Listing>().await, Load::Loading));
    assert_eq!(backend.list_calls(EntityKind::Listings), 0);
}

#[tokio::test]
async fn test_failed_first_load_is_reported_as_failed() {
    let (backend, snapshots) = seeded(&[]);
    backend.fail_lists(true);
    let cache = entity_cache(&backend, &snapshots);

    let err = cache.fetch::<Listing>().await.unwrap_err();
    assert!(matches!(err, CacheError::Backend(_)));
    assert!(matches!(cache.state::<Listing>().await, Load::Failed(_)));
}

#[tokio::test]
async fn test_failed_refresh_keeps_stale_data_available() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    let cache = entity_cache(&backend, &snapshots);
    cache.fetch::<Listing>().await.unwrap();

    backend.fail_lists(true);
    assert!(cache.refresh::<Listing>().await.is_err());

    match cache.state::<Listing>().await {
        Load::Ready(collection) => assert_eq!(collection.len(), 1),
        other => panic!("expected stale data, got {other:?}"),
    }
    assert!(cache.last_error::<Listing>().await.is_some());
    // The snapshot of the last good load is untouched.
    assert!(snapshots
        .get(&snapshot_key(EntityKind::Listings))
        .await
        .unwrap()
        .is_some());

    backend.fail_lists(false);
    cache.refresh::<Listing>().await.unwrap();
    assert!(cache.last_error::<Listing>().await.is_none());
}

// =============================================================================
// Snapshots
// =============================================================================

#[tokio::test]
async fn test_new_cache_hydrates_from_snapshot_then_refreshes() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    entity_cache(&backend, &snapshots).fetch::<Listing>().await.unwrap();

    backend.set_list_delay(Duration::from_millis(100));
    let restarted = entity_cache(&backend, &snapshots);
    let hydrated = restarted.fetch::<Listing>().await.unwrap();
    assert_eq!(hydrated.source(), Source::Persisted);
    assert_eq!(hydrated.len(), 1);

    // The background load replaces the snapshot data.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let refreshed = restarted.fetch::<Listing>().await.unwrap();
    assert_eq!(refreshed.source(), Source::Remote);
    assert_eq!(backend.list_calls(EntityKind::Listings), 2);
}

#[tokio::test]
async fn test_malformed_snapshot_is_a_miss() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    snapshots
        .set(&snapshot_key(EntityKind::Listings), "{\"version\":".to_string())
        .await
        .unwrap();

    let collection = entity_cache(&backend, &snapshots).fetch::<Listing>().await.unwrap();
    assert_eq!(collection.source(), Source::Remote);
    assert_eq!(collection.len(), 1);
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn test_add_update_delete_apply_to_memory_and_snapshot() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[]);
    let cache = entity_cache(&backend, &snapshots);
    cache.fetch::<Listing>().await.unwrap();

    let created = cache.add::<Listing>(draft(factory)).await.unwrap();
    assert!(cache.fetch::<Listing>().await.unwrap().get(created.id).is_some());

    let patch = ListingPatch {
        status: Some(ListingStatus::Sold),
        ..ListingPatch::default()
    };
    let updated = cache.update::<Listing>(created.id, patch).await.unwrap();
    assert_eq!(updated.status, ListingStatus::Sold);
    let held = cache.fetch::<Listing>().await.unwrap();
    assert_eq!(held.get(created.id).unwrap().status, ListingStatus::Sold);
    assert_eq!(held.source(), Source::Memory);

    cache.delete::<Listing>(created.id).await.unwrap();
    assert!(cache.fetch::<Listing>().await.unwrap().is_empty());

    // Only the first read went to the backend.
    assert_eq!(backend.list_calls(EntityKind::Listings), 1);

    // A fresh cache sees the same state through the snapshot.
    let restarted = entity_cache(&backend, &snapshots);
    let hydrated = restarted.fetch::<Listing>().await.unwrap();
    assert_eq!(hydrated.source(), Source::Persisted);
    assert!(hydrated.is_empty());
}

#[tokio::test]
async fn test_failed_delete_keeps_the_listing() {
    let factory = UserId::random();
    let kept = listing(factory, ListingStatus::Live, 1);
    let (backend, snapshots) = seeded(std::slice::from_ref(&kept));
    let cache = entity_cache(&backend, &snapshots);
    let before = cache.fetch::<Listing>().await.unwrap();

    backend.fail_mutations(true);
    let err = cache.delete::<Listing>(kept.id).await.unwrap_err();
    assert!(matches!(err, CacheError::Backend(_)));

    let after = cache.fetch::<Listing>().await.unwrap();
    assert_eq!(before, after);
    assert!(after.get(kept.id).is_some());
}

#[tokio::test]
async fn test_failed_add_leaves_memory_untouched() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    let cache = entity_cache(&backend, &snapshots);
    let before = cache.fetch::<Listing>().await.unwrap();

    backend.fail_mutations(true);
    assert!(cache.add::<Listing>(draft(factory)).await.is_err());
    assert_eq!(cache.fetch::<Listing>().await.unwrap(), before);
}

#[tokio::test]
async fn test_failed_update_leaves_memory_untouched() {
    let factory = UserId::random();
    let kept = listing(factory, ListingStatus::Live, 1);
    let (backend, snapshots) = seeded(std::slice::from_ref(&kept));
    let cache = entity_cache(&backend, &snapshots);
    let before = cache.fetch::<Listing>().await.unwrap();

    backend.fail_mutations(true);
    let patch = ListingPatch {
        status: Some(ListingStatus::Sold),
        ..ListingPatch::default()
    };
    let err = cache.update::<Listing>(kept.id, patch).await.unwrap_err();
    assert!(matches!(err, CacheError::Backend(_)));

    let after = cache.fetch::<Listing>().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.get(kept.id).unwrap().status, ListingStatus::Live);
    let snapshot = snapshots.get(&snapshot_key(EntityKind::Listings)).await.unwrap();
    assert!(snapshot.is_none_or(|raw| !raw.contains("\"sold\"")));
}

#[tokio::test]
async fn test_mutation_during_load_is_not_overwritten() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    backend.set_list_delay(Duration::from_millis(100));
    let cache = entity_cache(&backend, &snapshots);

    // The load reads the table before the new row exists.
    let loading = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch::<Listing>().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let created = cache.add::<Listing>(draft(factory)).await.unwrap();
    loading.await.unwrap().unwrap();

    let held = cache.fetch::<Listing>().await.unwrap();
    assert_eq!(held.len(), 2);
    assert!(held.get(created.id).is_some());
}

#[tokio::test]
async fn test_mutation_before_any_read_clears_the_snapshot() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[]);
    snapshots
        .set(&snapshot_key(EntityKind::Listings), "stale".to_string())
        .await
        .unwrap();

    entity_cache(&backend, &snapshots)
        .add::<Listing>(draft(factory))
        .await
        .unwrap();

    assert!(snapshots
        .get(&snapshot_key(EntityKind::Listings))
        .await
        .unwrap()
        .is_none());
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_one_user_on_two_devices_shares_one_cache() {
    let factory = UserId::random();
    let (backend, snapshots) = seeded(&[listing(factory, ListingStatus::Live, 1)]);
    let registry = CacheRegistry::new(
        Arc::clone(&backend) as Arc<dyn RemoteBackend>,
        snapshots as Arc<dyn KeyValueStore>,
        Duration::from_secs(60),
    );
    let laptop = AccessToken::new("laptop");
    let phone = AccessToken::new("phone");

    for _ in 0..5 {
        for token in [&laptop, &phone] {
            let cache = registry.cache_for(factory, token).await;
            assert_eq!(cache.fetch::<Listing>().await.unwrap().len(), 1);
        }
    }
    assert_eq!(backend.list_calls(EntityKind::Listings), 1);

    // Remote calls go out with the token of the latest request.
    let cache = registry.cache_for(factory, &laptop).await;
    cache.add::<Listing>(draft(factory)).await.unwrap();
    assert_eq!(backend.last_token().as_deref(), Some("laptop"));
}

// =============================================================================
// Stats
// =============================================================================

#[tokio::test]
async fn test_stats_listing_distribution() {
    let factory = UserId::random();
    let mut rows = Vec::new();
    rows.extend((0..3).map(|_| listing(factory, ListingStatus::Sold, 2)));
    rows.extend((0..2).map(|_| listing(factory, ListingStatus::Pending, 2)));
    let (backend, snapshots) = seeded(&rows);
    let admin = user(Some(Role::Admin), "Root");
    backend.seed(EntityKind::Users, &[profile(&admin)]);
    backend.seed(EntityKind::BulkRequests, &[bulk_request(UserId::random())]);

    let stats = entity_cache(&backend, &snapshots).load_stats(Utc::now()).await.unwrap();

    assert_eq!(stats.total_listings, 5);
    assert_eq!(stats.listing_status.total, Decimal::from(5));
    let percent = |status| stats.listing_status.get(&status).unwrap().percent;
    assert_eq!(percent(ListingStatus::Live), Decimal::ZERO);
    assert_eq!(percent(ListingStatus::Sold), Decimal::from(60));
    assert_eq!(percent(ListingStatus::Pending), Decimal::from(40));
    assert_eq!(stats.open_bulk_requests, 1);
    // Empty tables are zero, never NaN.
    assert_eq!(stats.revenue.change_percent, Decimal::ZERO);
}

#[tokio::test]
async fn test_stats_reads_only_held_collections() {
    let factory = UserId::random();
    let rows: Vec<_> = (0..2).map(|_| listing(factory, ListingStatus::Live, 1)).collect();
    let (backend, snapshots) = seeded(&rows);
    backend.seed(EntityKind::BulkRequests, &[bulk_request(UserId::random())]);
    let cache = entity_cache(&backend, &snapshots);

    assert_eq!(cache.stats(Utc::now()).await.total_listings, 0);

    cache.fetch::<Listing>().await.unwrap();
    let stats = cache.stats(Utc::now()).await;
    assert_eq!(stats.total_listings, 2);
    assert_eq!(stats.open_bulk_requests, 0);

    assert_eq!(backend.list_calls(EntityKind::Listings), 1);
    assert_eq!(backend.list_calls(EntityKind::BulkRequests), 0);
    assert_eq!(backend.list_calls(EntityKind::Users), 0);
}

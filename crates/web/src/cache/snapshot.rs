//! Persisted snapshots of cached collections.
//!
//! A snapshot is a versioned JSON record stored under `cache:<kind>` in the
//! session-scope store. Anything that does not parse as the current version
//! of the expected kind is treated as absent.

use chrono::{DateTime, Utc};
use rewoven_core::{Entity, EntityKind};
use serde::{Deserialize, Serialize};

use super::collection::{CachedCollection, Source};

/// Bumped whenever the record layout changes; older records become misses.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot<T> {
    version: u32,
    kind: EntityKind,
    fetched_at: DateTime<Utc>,
    items: T,
}

/// Store key of the snapshot for `kind`.
#[must_use]
pub fn snapshot_key(kind: EntityKind) -> String {
    format!("cache:{kind}")
}

/// Serialize a collection for the store.
pub(crate) fn encode<E: Entity>(collection: &CachedCollection<E>) -> serde_json::Result<String> {
    serde_json::to_string(&Snapshot {
        version: SNAPSHOT_VERSION,
        kind: E::KIND,
        fetched_at: collection.fetched_at(),
        items: collection.items(),
    })
}

/// Rebuild a collection from a stored blob, or `None` if it is unusable.
pub(crate) fn decode<E: Entity>(blob: &str) -> Option<CachedCollection<E>> {
    let snapshot: Snapshot<Vec<E>> = serde_json::from_str(blob).ok()?;
    if snapshot.version != SNAPSHOT_VERSION || snapshot.kind != E::KIND {
        return None;
    }
    Some(CachedCollection::new(
        snapshot.items,
        snapshot.fetched_at,
        Source::Persisted,
    ))
}

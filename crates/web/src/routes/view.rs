//! Shared shape of collection responses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{Cached, CachedCollection, EntityCache, Load, Source};
use crate::error::Result;

/// Shown when a view is served from data older than the latest failed refresh.
pub const STALE_NOTICE: &str = "Showing saved data; the latest refresh failed.";

/// `?refresh=true` asks for a reload from the backend before rendering.
#[derive(Debug, Default, Deserialize)]
pub struct Freshness {
    #[serde(default)]
    pub refresh: bool,
}

/// A collection response.
#[derive(Debug, Serialize)]
pub struct CollectionView<T> {
    pub items: Vec<T>,
    pub fetched_at: DateTime<Utc>,
    pub source: Source,
    pub notice: Option<&'static str>,
}

/// A collection read through the cache, with its refresh status.
pub struct Loaded<E> {
    pub collection: Arc<CachedCollection<E>>,
    pub notice: Option<&'static str>,
}

impl<E: Cached> Loaded<E> {
    /// Every held item.
    #[must_use]
    pub fn all(&self) -> CollectionView<E> {
        self.view(self.collection.items().to_vec())
    }

    /// Held items passing `keep`.
    pub fn filtered(&self, keep: impl Fn(&E) -> bool) -> CollectionView<E> {
        self.view(
            self.collection
                .items()
                .iter()
                .filter(|item| keep(item))
                .cloned()
                .collect(),
        )
    }

    /// Wrap already-selected `items` with this collection's metadata.
    pub fn view<T>(&self, items: Vec<T>) -> CollectionView<T> {
        CollectionView {
            items,
            fetched_at: self.collection.fetched_at(),
            source: self.collection.source(),
            notice: self.notice,
        }
    }
}

/// Read `E` through the cache.
///
/// With `refresh`, a failed reload falls back to held data when there is any.
///
/// # Errors
///
/// Returns an error if nothing is held and the backend cannot be reached.
pub async fn load<E: Cached>(cache: &EntityCache, refresh: bool) -> Result<Loaded<E>> {
    let collection = if refresh {
        match cache.refresh::<E>().await {
            Ok(collection) => collection,
            Err(e) => match cache.state::<E>().await {
                Load::Ready(stale) => {
                    warn!(kind = %E::KIND, error = %e, "Refresh failed; serving held data");
                    stale
                }
                Load::Loading | Load::Failed(_) => return Err(e.into()),
            },
        }
    } else {
        cache.fetch::<E>().await?
    };
    let notice = cache.last_error::<E>().await.map(|_| STALE_NOTICE);
    Ok(Loaded { collection, notice })
}

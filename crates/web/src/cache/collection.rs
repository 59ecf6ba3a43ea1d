//! In-memory collection of one entity kind.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{DateTime, Utc};
use rewoven_core::Entity;
use serde::Serialize;

/// Where the held items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Result of a local mutation applied over earlier data.
    Memory,
    /// Hydrated from a persisted snapshot; a remote refresh is under way.
    Persisted,
    /// Straight from the remote backend.
    Remote,
}

/// Items of one kind, unique by id. Order is not meaningful.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedCollection<E> {
    items: Vec<E>,
    fetched_at: DateTime<Utc>,
    source: Source,
}

impl<E: Entity> CachedCollection<E> {
    /// Build a collection; on duplicate ids the last row wins.
    #[must_use]
    pub fn new(items: Vec<E>, fetched_at: DateTime<Utc>, source: Source) -> Self {
        Self {
            items: dedupe(items),
            fetched_at,
            source,
        }
    }

    #[must_use]
    pub fn items(&self) -> &[E] {
        &self.items
    }

    #[must_use]
    pub const fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    #[must_use]
    pub const fn source(&self) -> Source {
        self.source
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an item by id.
    #[must_use]
    pub fn get(&self, id: E::Id) -> Option<&E> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Copy with `item` inserted, or replacing the item with the same id.
    #[must_use]
    pub(crate) fn with_upserted(&self, item: E) -> Self {
        let mut items = self.items.clone();
        match items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        Self {
            items,
            fetched_at: self.fetched_at,
            source: Source::Memory,
        }
    }

    /// Copy without the item with `id`.
    #[must_use]
    pub(crate) fn without(&self, id: E::Id) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|item| item.id() != id)
                .cloned()
                .collect(),
            fetched_at: self.fetched_at,
            source: Source::Memory,
        }
    }
}

fn dedupe<E: Entity>(items: Vec<E>) -> Vec<E> {
    let mut positions: HashMap<E::Id, usize> = HashMap::with_capacity(items.len());
    let mut unique: Vec<E> = Vec::with_capacity(items.len());
    for item in items {
        match positions.entry(item.id()) {
            Entry::Occupied(slot) => unique[*slot.get()] = item,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(item);
            }
        }
    }
    unique
}

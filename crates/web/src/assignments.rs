//! Bulk request to factory assignments.
//!
//! Admins route an open bulk request to a factory. The map lives as one JSON
//! blob in the durable store, not in the remote backend.

use std::collections::HashMap;
use std::sync::Arc;

use rewoven_core::{BulkRequestId, UserId};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::store::{KeyValueStore, StoreError};

/// Durable-store key of the assignment map.
pub const ASSIGNMENTS_KEY: &str = "bulk_request_assignments";

pub type Assignments = HashMap<BulkRequestId, UserId>;

/// Read-modify-write access to the assignment map.
#[derive(Clone)]
pub struct AssignmentBook {
    inner: Arc<AssignmentBookInner>,
}

struct AssignmentBookInner {
    store: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles.
    write: Mutex<()>,
}

impl AssignmentBook {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(AssignmentBookInner {
                store,
                write: Mutex::new(()),
            }),
        }
    }

    /// Every assignment.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn all(&self) -> Result<Assignments, StoreError> {
        self.load().await
    }

    /// Bulk requests assigned to `factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn assigned_to(&self, factory: UserId) -> Result<Vec<BulkRequestId>, StoreError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter_map(|(request, assignee)| (assignee == factory).then_some(request))
            .collect())
    }

    /// Assign `request` to `factory`, replacing any earlier assignee.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    #[instrument(skip(self))]
    pub async fn assign(&self, request: BulkRequestId, factory: UserId) -> Result<(), StoreError> {
        let _write = self.inner.write.lock().await;
        let mut map = self.load().await?;
        map.insert(request, factory);
        self.save(&map).await?;
        info!("Bulk request assigned");
        Ok(())
    }

    /// Remove the assignment of `request`; returns the former assignee.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    #[instrument(skip(self))]
    pub async fn unassign(&self, request: BulkRequestId) -> Result<Option<UserId>, StoreError> {
        let _write = self.inner.write.lock().await;
        let mut map = self.load().await?;
        let former = map.remove(&request);
        if former.is_some() {
            self.save(&map).await?;
        }
        Ok(former)
    }

    async fn load(&self) -> Result<Assignments, StoreError> {
        let Some(blob) = self.inner.store.get(ASSIGNMENTS_KEY).await? else {
            return Ok(Assignments::new());
        };
        Ok(serde_json::from_str(&blob).unwrap_or_else(|e| {
            warn!(error = %e, "Assignment map unreadable; starting empty");
            Assignments::new()
        }))
    }

    async fn save(&self, map: &Assignments) -> Result<(), StoreError> {
        let blob = serde_json::to_string(map)?;
        self.inner.store.set(ASSIGNMENTS_KEY, blob).await
    }
}

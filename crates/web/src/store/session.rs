//! Session-scope store backed by the caller's `tower-sessions` record.

use async_trait::async_trait;
use tower_sessions::Session;

use super::{KeyValueStore, StoreError};

/// Adapts a request's [`Session`] to [`KeyValueStore`].
///
/// Blobs are stored as JSON strings inside the session record; the session
/// layer persists them when the response is sent.
#[derive(Clone)]
pub struct SessionStore {
    session: Session,
}

impl SessionStore {
    /// Wrap the request's session.
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl KeyValueStore for SessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.session.get::<String>(key).await?)
    }

    async fn set(&self, key: &str, blob: String) -> Result<(), StoreError> {
        self.session.insert(key, blob).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.session.remove::<String>(key).await?;
        Ok(())
    }
}

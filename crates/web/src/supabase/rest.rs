//! `PostgREST` client implementing the remote backend.

use std::sync::Arc;

use async_trait::async_trait;
use rewoven_core::EntityKind;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{error_message, excerpt, retry_after};
use crate::backend::{AccessToken, BackendError, RemoteBackend};
use crate::config::SupabaseConfig;

/// Client for the Supabase REST API.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<RestClientInner>,
}

struct RestClientInner {
    client: reqwest::Client,
    base: Url,
    anon_key: SecretString,
}

impl RestClient {
    /// Create a new REST client.
    #[must_use]
    pub fn new(config: &SupabaseConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Create a REST client sharing an existing HTTP connection pool.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &SupabaseConfig) -> Self {
        Self {
            inner: Arc::new(RestClientInner {
                client,
                base: config.url.clone(),
                anon_key: config.anon_key.clone(),
            }),
        }
    }

    /// Build `/rest/v1/<table>?select=*[&id=eq.<id>]`.
    fn table_url(&self, kind: EntityKind, id: Option<&str>) -> Result<Url, BackendError> {
        let mut url = self.inner.base.join(&format!("rest/v1/{}", kind.table()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("select", "*");
            if let Some(id) = id {
                query.append_pair("id", &format!("eq.{id}"));
            }
        }
        Ok(url)
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: Url,
        token: &AccessToken,
    ) -> reqwest::RequestBuilder {
        self.inner
            .client
            .request(method, url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(token.expose())
    }

    /// Send a request and decode the JSON array `PostgREST` answers with.
    async fn send_rows(
        &self,
        kind: EntityKind,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<Value>, BackendError> {
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::Unavailable(format!(
                "rate limited, retry after {} seconds",
                retry_after(&response)
            )));
        }

        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                kind = %kind,
                status = %status,
                body = %excerpt(&body),
                "Backend returned non-success status"
            );
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                kind = %kind,
                error = %e,
                body = %excerpt(&body),
                "Failed to parse backend response"
            );
            BackendError::Parse(e)
        })
    }

    /// Fetch one row by id, if visible to the token's owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, token), fields(kind = %kind))]
    pub async fn fetch_by_id(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<Value>, BackendError> {
        let url = self.table_url(kind, Some(id))?;
        let rows = self
            .send_rows(kind, self.request(reqwest::Method::GET, url, token))
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl RemoteBackend for RestClient {
    #[instrument(skip(self, token), fields(kind = %kind))]
    async fn list(&self, token: &AccessToken, kind: EntityKind) -> Result<Vec<Value>, BackendError> {
        let url = self.table_url(kind, None)?;
        let rows = self
            .send_rows(kind, self.request(reqwest::Method::GET, url, token))
            .await?;
        debug!(rows = rows.len(), "Listed rows");
        Ok(rows)
    }

    #[instrument(skip(self, token, payload), fields(kind = %kind))]
    async fn create(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        payload: Value,
    ) -> Result<Value, BackendError> {
        let url = self.table_url(kind, None)?;
        let request = self
            .request(reqwest::Method::POST, url, token)
            .header("Prefer", "return=representation")
            .json(&payload);
        self.send_rows(kind, request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Status {
                status: 201,
                message: "insert returned no row".to_string(),
            })
    }

    #[instrument(skip(self, token, patch), fields(kind = %kind))]
    async fn update(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        id: &str,
        patch: Value,
    ) -> Result<Value, BackendError> {
        let url = self.table_url(kind, Some(id))?;
        let request = self
            .request(reqwest::Method::PATCH, url, token)
            .header("Prefer", "return=representation")
            .json(&patch);
        self.send_rows(kind, request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    #[instrument(skip(self, token), fields(kind = %kind))]
    async fn delete(
        &self,
        token: &AccessToken,
        kind: EntityKind,
        id: &str,
    ) -> Result<(), BackendError> {
        let url = self.table_url(kind, Some(id))?;
        let request = self
            .request(reqwest::Method::DELETE, url, token)
            .header("Prefer", "return=representation");
        let deleted = self.send_rows(kind, request).await?;
        if deleted.is_empty() {
            return Err(BackendError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::new(&SupabaseConfig {
            url: Url::parse("https://project.supabase.co/").unwrap(),
            anon_key: SecretString::from("anon"),
        })
    }

    #[test]
    fn test_table_url_lists_everything() {
        let url = client().table_url(EntityKind::BulkRequests, None).unwrap();
        assert_eq!(
            url.as_str(),
            "https://project.supabase.co/rest/v1/bulk_requests?select=*"
        );
    }

    #[test]
    fn test_table_url_filters_by_id() {
        let url = client()
            .table_url(EntityKind::Users, Some("0b6f3a0e-7f6a-4a5e-9d1e-5c2b1a0f9e8d"))
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/profiles");
        assert!(
            url.query()
                .unwrap()
                .contains("id=eq.0b6f3a0e-7f6a-4a5e-9d1e-5c2b1a0f9e8d")
        );
    }
}

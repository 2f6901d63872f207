//! CRM connection management.
//!
//! Connecting is a two-phase OAuth flow. [`ConnectionManager::initiate_oauth`]
//! returns the provider's authorization URL for the user's browser; once the
//! provider redirects back, [`ConnectionManager::complete_oauth`] reads the
//! callback URL and re-queries the connection. Connection state is never
//! computed locally: every mutation invalidates the connection queries and
//! the next read goes to the backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::{info, instrument, warn};

use crate::api::Backend;
use crate::domain::{
    ConnectionTestResult, CrmConnection, CrmProvider, DealSchema, OAuthCallback,
};
use crate::error::ApiError;
use crate::store::{CachedValue, Mutation, QueryCache, QueryKey};

/// CRM connection operations
#[derive(Clone)]
pub struct ConnectionManager {
    backend: Arc<dyn Backend>,
    cache: Arc<QueryCache>,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn Backend>, cache: Arc<QueryCache>) -> Self {
        Self { backend, cache }
    }

    /// All connections of the signed-in user
    pub async fn list(&self) -> Result<Vec<CrmConnection>, ApiError> {
        if let Some(CachedValue::Connections(cached)) =
            self.cache.get_fresh(&QueryKey::Connections).await
        {
            return Ok(cached);
        }

        let ticket = self.cache.begin_fetch(QueryKey::Connections).await;
        let connections = self.backend.list_connections().await?;
        self.cache
            .complete_fetch(ticket, CachedValue::Connections(connections.clone()))
            .await;
        Ok(connections)
    }

    /// Connection for one provider, None when not connected
    pub async fn get(&self, provider: CrmProvider) -> Result<Option<CrmConnection>, ApiError> {
        let key = QueryKey::Connection(provider);
        if let Some(CachedValue::Connection(cached)) = self.cache.get_fresh(&key).await {
            return Ok(cached);
        }

        let ticket = self.cache.begin_fetch(key).await;
        let connection = self.backend.get_connection(provider).await?;
        self.cache
            .complete_fetch(ticket, CachedValue::Connection(connection.clone()))
            .await;
        Ok(connection)
    }

    /// Phase one: URL the user's browser must visit to grant access
    #[instrument(skip(self))]
    pub async fn initiate_oauth(&self, provider: CrmProvider) -> Result<Url, ApiError> {
        if !provider.is_supported() {
            return Err(ApiError::Provider {
                provider: provider.display_name().to_string(),
                message: "This integration is not available yet".to_string(),
            });
        }

        let response = self.backend.authorize_url(provider).await?;
        let url = Url::parse(&response.authorization_url).map_err(|e| {
            ApiError::Decode(format!(
                "Authorization URL '{}' is invalid: {}",
                response.authorization_url, e
            ))
        })?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ApiError::Decode(format!(
                "Authorization URL must be http(s): {}",
                url
            )));
        }

        info!(host = url.host_str().unwrap_or_default(), "OAuth initiated");
        Ok(url)
    }

    /// Phase two: interpret the redirect back from the provider
    #[instrument(skip(self))]
    pub async fn complete_oauth(&self, callback_url: &str) -> Result<CrmConnection, ApiError> {
        match OAuthCallback::from_url(callback_url)? {
            OAuthCallback::Denied { code, description } => {
                warn!(%code, "OAuth denied");
                Err(ApiError::Provider {
                    provider: "OAuth".to_string(),
                    message: description.unwrap_or(code),
                })
            }
            OAuthCallback::Connected(provider) => {
                self.cache.apply(&Mutation::CrmConnected(provider)).await;

                match self.get(provider).await? {
                    Some(connection) => {
                        info!(%provider, "CRM connected");
                        Ok(connection)
                    }
                    None => Err(ApiError::Provider {
                        provider: provider.display_name().to_string(),
                        message: "Authorization finished but no connection was stored"
                            .to_string(),
                    }),
                }
            }
        }
    }

    /// Remove the connection. Succeeds when already disconnected.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, provider: CrmProvider) -> Result<(), ApiError> {
        self.backend.disconnect(provider).await?;
        self.cache.apply(&Mutation::CrmDisconnected(provider)).await;
        info!(%provider, "CRM disconnected");
        Ok(())
    }

    /// Probe the stored connection
    pub async fn test(&self, provider: CrmProvider) -> Result<ConnectionTestResult, ApiError> {
        let result = self.backend.test_connection(provider).await?;
        if !result.success {
            warn!(%provider, error = ?result.error, "Connection test failed");
        }
        Ok(result)
    }

    /// Deal fields and pipeline stages of the connected CRM
    pub async fn schema(&self, provider: CrmProvider) -> Result<DealSchema, ApiError> {
        let key = QueryKey::DealSchema(provider);
        if let Some(CachedValue::DealSchema(cached)) = self.cache.get_fresh(&key).await {
            return Ok(cached);
        }

        let ticket = self.cache.begin_fetch(key).await;
        let schema = self.backend.deal_schema(provider).await?;
        self.cache
            .complete_fetch(ticket, CachedValue::DealSchema(schema.clone()))
            .await;
        Ok(schema)
    }

    /// Connections whose token expires within the refresh window
    pub async fn needing_refresh(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CrmConnection>, ApiError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|c| c.needs_refresh_at(now))
            .collect())
    }
}

//! Entry point bundling the services over one backend and one cache.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::connections::ConnectionManager;
use super::memos::MemoService;
use crate::api::{Backend, HttpBackend};
use crate::config::ResolvedConfig;
use crate::domain::{User, UserSettingsUpdate};
use crate::error::ApiError;
use crate::store::{CachedValue, Mutation, QueryCache, QueryKey};

/// dealmemo client
#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn Backend>,
    cache: Arc<QueryCache>,
    pub memos: MemoService,
    pub connections: ConnectionManager,
}

impl Client {
    /// Client over any backend with a fresh cache
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let cache = Arc::new(QueryCache::new());
        Self {
            memos: MemoService::new(backend.clone(), cache.clone()),
            connections: ConnectionManager::new(backend.clone(), cache.clone()),
            backend,
            cache,
        }
    }

    /// HTTP client configured from the resolved settings
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ApiError> {
        let backend = HttpBackend::from_config(config)?;
        info!(base_url = %config.api.base_url, "Using HTTP backend");

        let mut client = Self::new(Arc::new(backend));
        client.memos = client
            .memos
            .with_poll_interval(Duration::from_millis(config.polling.interval_ms));
        Ok(client)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// The signed-in user's profile
    pub async fn current_user(&self) -> Result<User, ApiError> {
        if let Some(CachedValue::User(user)) = self.cache.get_fresh(&QueryKey::CurrentUser).await
        {
            return Ok(user);
        }

        let ticket = self.cache.begin_fetch(QueryKey::CurrentUser).await;
        let user = self.backend.current_user().await?;
        self.cache
            .complete_fetch(ticket, CachedValue::User(user.clone()))
            .await;
        Ok(user)
    }

    /// Change whether approvals may create new CRM contacts/companies
    pub async fn set_allow_create_records(&self, allow: bool) -> Result<User, ApiError> {
        let update = UserSettingsUpdate {
            allow_create_records: Some(allow),
        };
        let user = self.backend.update_user(&update).await?;

        self.cache.apply(&Mutation::UserUpdated).await;
        self.cache
            .set(QueryKey::CurrentUser, CachedValue::User(user.clone()))
            .await;
        Ok(user)
    }
}

//! Backend wrapper for tests that need to control request timing or
//! misbehave in ways the simulator does not.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dealmemo::api::{AudioUpload, Backend, MemoFilter, MemoryBackend, SubmitReceipt};
use dealmemo::domain::{
    AuthorizationUrl, ConnectionTestResult, CrmConnection, CrmProvider, DealSchema,
    ExtractionUpdate, Memo, MemoId, User, UserSettingsUpdate,
};
use dealmemo::error::ApiError;
use tokio::sync::{Notify, Semaphore};

/// Delegates to a [`MemoryBackend`], optionally holding `get_memo` calls
/// until released and answering approvals without applying them.
pub struct ControlledBackend {
    pub inner: Arc<MemoryBackend>,
    hold_fetches: AtomicBool,
    fetch_entered: Notify,
    fetch_gate: Semaphore,
    ignore_approvals: AtomicBool,
}

impl ControlledBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            hold_fetches: AtomicBool::new(false),
            fetch_entered: Notify::new(),
            fetch_gate: Semaphore::new(0),
            ignore_approvals: AtomicBool::new(false),
        }
    }

    /// Park every following `get_memo` until [`release_fetch`](Self::release_fetch)
    pub fn hold_fetches(&self) {
        self.hold_fetches.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held `get_memo` has reached the gate
    pub async fn fetch_started(&self) {
        self.fetch_entered.notified().await;
    }

    /// Let one held `get_memo` through
    pub fn release_fetch(&self) {
        self.fetch_gate.add_permits(1);
    }

    /// Answer `approve_memo` with the memo as it is, status unchanged
    pub fn ignore_approvals(&self) {
        self.ignore_approvals.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for ControlledBackend {
    fn name(&self) -> &str {
        "controlled"
    }

    async fn upload_memo(&self, upload: AudioUpload) -> Result<SubmitReceipt, ApiError> {
        self.inner.upload_memo(upload).await
    }

    async fn get_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        if self.hold_fetches.load(Ordering::SeqCst) {
            self.fetch_entered.notify_one();
            if let Ok(permit) = self.fetch_gate.acquire().await {
                permit.forget();
            }
        }
        self.inner.get_memo(id).await
    }

    async fn list_memos(&self, filter: &MemoFilter) -> Result<Vec<Memo>, ApiError> {
        self.inner.list_memos(filter).await
    }

    async fn approve_memo(
        &self,
        id: &MemoId,
        edits: Option<&ExtractionUpdate>,
    ) -> Result<Memo, ApiError> {
        if self.ignore_approvals.load(Ordering::SeqCst) {
            return self.inner.get_memo(id).await;
        }
        self.inner.approve_memo(id, edits).await
    }

    async fn reject_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.inner.reject_memo(id).await
    }

    async fn re_extract_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.inner.re_extract_memo(id).await
    }

    async fn delete_memo(&self, id: &MemoId) -> Result<(), ApiError> {
        self.inner.delete_memo(id).await
    }

    async fn list_connections(&self) -> Result<Vec<CrmConnection>, ApiError> {
        self.inner.list_connections().await
    }

    async fn get_connection(
        &self,
        provider: CrmProvider,
    ) -> Result<Option<CrmConnection>, ApiError> {
        self.inner.get_connection(provider).await
    }

    async fn authorize_url(&self, provider: CrmProvider) -> Result<AuthorizationUrl, ApiError> {
        self.inner.authorize_url(provider).await
    }

    async fn disconnect(&self, provider: CrmProvider) -> Result<(), ApiError> {
        self.inner.disconnect(provider).await
    }

    async fn test_connection(
        &self,
        provider: CrmProvider,
    ) -> Result<ConnectionTestResult, ApiError> {
        self.inner.test_connection(provider).await
    }

    async fn deal_schema(&self, provider: CrmProvider) -> Result<DealSchema, ApiError> {
        self.inner.deal_schema(provider).await
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.inner.current_user().await
    }

    async fn update_user(&self, update: &UserSettingsUpdate) -> Result<User, ApiError> {
        self.inner.update_user(update).await
    }
}

//! Memo lifecycle operations over the backend and the query cache.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::poller::{MemoPoller, PollHandle, POLL_INTERVAL};
use crate::api::{AudioUpload, Backend, MemoFilter, SubmitReceipt};
use crate::domain::{ExtractionUpdate, Memo, MemoAction, MemoId, MemoStatus};
use crate::error::ApiError;
use crate::store::{CachedValue, Mutation, QueryCache, QueryKey};

/// Result of submitting audio: the backend receipt plus a live poll
pub struct Submission {
    pub receipt: SubmitReceipt,
    pub poll: PollHandle,
}

/// Lifecycle operations on memos
#[derive(Clone)]
pub struct MemoService {
    backend: Arc<dyn Backend>,
    cache: Arc<QueryCache>,
    poll_interval: Duration,
}

impl MemoService {
    pub fn new(backend: Arc<dyn Backend>, cache: Arc<QueryCache>) -> Self {
        Self {
            backend,
            cache,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Upload audio; the new memo starts in `uploading` and is polled
    /// until it leaves the processing statuses.
    #[instrument(skip(self, upload), fields(file = %upload.file_name))]
    pub async fn submit(&self, upload: AudioUpload) -> Result<Submission, ApiError> {
        let receipt = self.backend.upload_memo(upload).await?;
        info!(memo_id = %receipt.id, status = %receipt.status, "Memo submitted");

        self.cache.apply(&Mutation::MemoSubmitted).await;
        let poll = self.watch(&receipt.id);

        Ok(Submission { receipt, poll })
    }

    /// Fetch a memo and cache it. On failure the cached copy is left as is.
    pub async fn get(&self, id: &MemoId) -> Result<Memo, ApiError> {
        let ticket = self.cache.begin_fetch(QueryKey::Memo(id.clone())).await;
        let memo = self.backend.get_memo(id).await?;

        if !self
            .cache
            .complete_fetch(ticket, CachedValue::Memo(memo.clone()))
            .await
        {
            // A mutation response landed while we were waiting; prefer it
            if let Some(newer) = self.cache.memo(id).await {
                return Ok(newer);
            }
        }

        Ok(memo)
    }

    /// Cached memo without a request
    pub async fn cached(&self, id: &MemoId) -> Option<Memo> {
        self.cache.memo(id).await
    }

    pub async fn list(&self, filter: &MemoFilter) -> Result<Vec<Memo>, ApiError> {
        let ticket = self
            .cache
            .begin_fetch(QueryKey::MemoList(filter.clone()))
            .await;
        let memos = self.backend.list_memos(filter).await?;
        self.cache
            .complete_fetch(ticket, CachedValue::Memos(memos.clone()))
            .await;
        Ok(memos)
    }

    /// Approve a memo under review, merging `edits` over its extraction
    #[instrument(skip(self, edits), fields(memo_id = %id))]
    pub async fn approve(
        &self,
        id: &MemoId,
        edits: Option<ExtractionUpdate>,
    ) -> Result<Memo, ApiError> {
        self.guard(id, MemoAction::Approve).await?;
        let edits = edits.filter(|e| !e.is_empty());
        let result = self.backend.approve_memo(id, edits.as_ref()).await;
        self.confirm(id, MemoAction::Approve, result).await
    }

    #[instrument(skip(self), fields(memo_id = %id))]
    pub async fn reject(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.guard(id, MemoAction::Reject).await?;
        let result = self.backend.reject_memo(id).await;
        self.confirm(id, MemoAction::Reject, result).await
    }

    /// Send a memo back to extraction. Polling does not restart on its own;
    /// call [`watch`](Self::watch) to follow the new run.
    #[instrument(skip(self), fields(memo_id = %id))]
    pub async fn re_extract(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.guard(id, MemoAction::ReExtract).await?;
        let result = self.backend.re_extract_memo(id).await;
        self.confirm(id, MemoAction::ReExtract, result).await
    }

    /// Delete a memo in any status. Deleting an unknown memo succeeds.
    #[instrument(skip(self), fields(memo_id = %id))]
    pub async fn delete(&self, id: &MemoId) -> Result<(), ApiError> {
        self.backend.delete_memo(id).await?;
        info!("Memo deleted");
        self.cache.apply(&Mutation::MemoDeleted(id.clone())).await;
        Ok(())
    }

    /// Start polling `id` until it leaves the processing statuses
    pub fn watch(&self, id: &MemoId) -> PollHandle {
        MemoPoller::new(self.clone(), self.poll_interval).spawn(id.clone())
    }

    /// Refuse actions the fresh cached status does not permit. The cached
    /// entry is invalidated, so the next attempt is left to the backend.
    async fn guard(&self, id: &MemoId, action: MemoAction) -> Result<(), ApiError> {
        let key = QueryKey::Memo(id.clone());
        if let Some(CachedValue::Memo(memo)) = self.cache.get_fresh(&key).await {
            if !memo.status.permits(action) {
                warn!(status = %memo.status, %action, "Action not permitted by cached status");
                self.cache.invalidate(&key).await;
                return Err(ApiError::InvalidTransition {
                    action,
                    from: Some(memo.status),
                });
            }
        }
        Ok(())
    }

    /// Accept a mutation response only if it carries the expected status.
    /// A transition the backend refused leaves our copy stale.
    async fn confirm(
        &self,
        id: &MemoId,
        action: MemoAction,
        result: Result<Memo, ApiError>,
    ) -> Result<Memo, ApiError> {
        let memo = match result {
            Ok(memo) => memo,
            Err(err) => {
                if matches!(err, ApiError::InvalidTransition { .. }) {
                    self.cache.invalidate(&QueryKey::Memo(id.clone())).await;
                }
                return Err(err);
            }
        };

        let status = memo.status;
        self.cache
            .set(QueryKey::Memo(id.clone()), CachedValue::Memo(memo.clone()))
            .await;
        self.cache.apply(&Mutation::MemoUpdated(id.clone())).await;

        match MemoStatus::after(action) {
            Some(expected) if expected != status => {
                warn!(%expected, actual = %status, "Backend did not confirm transition");
                Err(ApiError::InvalidTransition {
                    action,
                    from: Some(status),
                })
            }
            _ => {
                info!(%status, "Memo transitioned");
                Ok(memo)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryBackend;

    async fn service_with_review_memo() -> (MemoService, Arc<MemoryBackend>, MemoId) {
        let backend = Arc::new(MemoryBackend::new());
        let service = MemoService::new(backend.clone(), Arc::new(QueryCache::new()));

        let upload = AudioUpload::new("call.m4a", vec![1; 64]).unwrap();
        let receipt = backend.upload_memo(upload).await.unwrap();
        for _ in 0..3 {
            backend.advance(&receipt.id).await.unwrap();
        }
        (service, backend, receipt.id)
    }

    #[tokio::test]
    async fn test_guard_uses_cached_status() {
        let (service, backend, id) = service_with_review_memo().await;
        service.get(&id).await.unwrap();

        // Backend moves on behind the cache's back
        backend.reject_memo(&id).await.unwrap();

        // Cached status still says pending_review, so the backend decides
        let err = service.approve(&id, None).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::InvalidTransition {
                from: Some(MemoStatus::Rejected),
                ..
            }
        ));
        assert!(service.cache().is_stale(&QueryKey::Memo(id.clone())).await);
    }

    #[tokio::test]
    async fn test_guard_blocks_and_invalidates() {
        let (service, _backend, id) = service_with_review_memo().await;
        service.reject(&id).await.unwrap();

        let err = service.reject(&id).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert!(service.cache().is_stale(&QueryKey::Memo(id.clone())).await);
    }

    #[tokio::test]
    async fn test_refused_action_leaves_next_attempt_to_backend() {
        let (service, backend, id) = service_with_review_memo().await;
        let key = QueryKey::Memo(id.clone());

        // Cache believes the memo is still extracting
        let mut extracting = backend.get_memo(&id).await.unwrap();
        extracting.status = MemoStatus::Extracting;
        extracting.extraction = None;
        service.cache().set(key.clone(), CachedValue::Memo(extracting)).await;

        let err = service.approve(&id, None).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::InvalidTransition {
                from: Some(MemoStatus::Extracting),
                ..
            }
        ));
        assert!(service.cache().is_stale(&key).await);

        // Stale copy no longer blocks; the backend accepts
        let memo = service.approve(&id, None).await.unwrap();
        assert_eq!(memo.status, MemoStatus::Approved);
        assert_eq!(service.cached(&id).await.unwrap().status, MemoStatus::Approved);
    }

    #[tokio::test]
    async fn test_empty_edits_are_dropped() {
        let (service, _backend, id) = service_with_review_memo().await;
        let memo = service
            .approve(&id, Some(ExtractionUpdate::default()))
            .await
            .unwrap();

        assert_eq!(memo.status, MemoStatus::Approved);
        assert_eq!(
            memo.extraction.unwrap().company_name.as_deref(),
            Some("Acme Corp")
        );
    }
}

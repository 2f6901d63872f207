//! Memo Lifecycle Integration Tests
//!
//! Submit, review and delete memos through the public client against the
//! simulated backend.

mod support;

use std::sync::Arc;

use chrono::Utc;
use dealmemo::api::{AudioUpload, Backend, MemoFilter, MemoryBackend};
use dealmemo::core::Client;
use dealmemo::domain::{Extraction, ExtractionUpdate, Memo, MemoId, MemoStatus};
use dealmemo::error::ApiError;
use dealmemo::store::QueryKey;
use support::ControlledBackend;

fn memo_in(status: MemoStatus) -> Memo {
    let reviewed = !status.is_processing() && status != MemoStatus::Failed;
    let transcribed = reviewed || status == MemoStatus::Extracting;

    Memo {
        id: MemoId::new(format!("memo_{}", status)),
        user_id: "user_demo".to_string(),
        status,
        audio_url: "memory://audio/call.m4a".to_string(),
        audio_duration_seconds: 95.0,
        transcript: transcribed.then(|| "Spoke with Dana at Beta Inc.".to_string()),
        transcript_confidence: transcribed.then_some(0.9),
        extraction: reviewed.then(|| Extraction {
            company_name: Some("Beta".to_string()),
            deal_amount: Some(8000.0),
            deal_currency: Some("USD".to_string()),
            contact_name: Some("Dana Smith".to_string()),
            next_steps: vec!["Send pricing".to_string()],
            ..Default::default()
        }),
        error_message: (status == MemoStatus::Failed).then(|| "Transcription failed".to_string()),
        created_at: Utc::now(),
        processed_at: reviewed.then(Utc::now),
        approved_at: (status == MemoStatus::Approved).then(Utc::now),
    }
}

async fn client_with(memo: Memo) -> (Client, Arc<MemoryBackend>, MemoId) {
    let backend = Arc::new(MemoryBackend::new());
    let id = memo.id.clone();
    backend.insert_memo(memo).await;
    (Client::new(backend.clone()), backend, id)
}

#[test]
fn test_fixtures_are_valid_memos() {
    for status in MemoStatus::ALL {
        assert_eq!(memo_in(status).invariant_violation(), None, "{}", status);
    }
}

#[tokio::test(start_paused = true)]
async fn test_submit_review_approve_end_to_end() {
    let backend = Arc::new(MemoryBackend::simulated());
    let client = Client::new(backend.clone());

    let upload = AudioUpload::new("discovery-call.m4a", vec![3; 48_000]).unwrap();
    let submission = client.memos.submit(upload).await.unwrap();
    assert_eq!(submission.receipt.status, MemoStatus::Uploading);

    let reviewed = submission.poll.settled().await.unwrap();
    assert_eq!(reviewed.status, MemoStatus::PendingReview);
    assert!(reviewed.transcript.is_some());
    assert!(reviewed.extraction.is_some());
    assert_eq!(reviewed.invariant_violation(), None);

    let edits = ExtractionUpdate {
        deal_amount: Some(5000.0),
        ..Default::default()
    };
    let approved = client.memos.approve(&reviewed.id, Some(edits)).await.unwrap();

    assert_eq!(approved.status, MemoStatus::Approved);
    assert!(approved.approved_at.is_some());
    let extraction = approved.extraction.unwrap();
    assert_eq!(extraction.deal_amount, Some(5000.0));
    assert_eq!(extraction.company_name.as_deref(), Some("Acme Corp"));
}

#[tokio::test]
async fn test_approve_merges_only_edited_fields() {
    let (client, _backend, id) = client_with(memo_in(MemoStatus::PendingReview)).await;

    let mut edits = ExtractionUpdate::default();
    edits.set_field("companyName", "Acme").unwrap();

    let memo = client.memos.approve(&id, Some(edits)).await.unwrap();
    let extraction = memo.extraction.unwrap();

    assert_eq!(extraction.company_name.as_deref(), Some("Acme"));
    assert_eq!(extraction.deal_amount, Some(8000.0));
    assert_eq!(extraction.contact_name.as_deref(), Some("Dana Smith"));
    assert_eq!(extraction.next_steps, vec!["Send pricing".to_string()]);
}

#[tokio::test]
async fn test_review_actions_refused_outside_pending_review() {
    for status in MemoStatus::ALL {
        if status == MemoStatus::PendingReview {
            continue;
        }

        let (client, backend, id) = client_with(memo_in(status)).await;

        let err = client.memos.approve(&id, None).await.unwrap_err();
        assert!(
            matches!(err, ApiError::InvalidTransition { from: Some(s), .. } if s == status),
            "approve from {}: {:?}",
            status,
            err
        );
        let err = client.memos.reject(&id).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));

        // Server-side status is untouched
        assert_eq!(backend.get_memo(&id).await.unwrap().status, status);
    }
}

#[tokio::test]
async fn test_approval_without_new_status_is_not_applied() {
    let inner = Arc::new(MemoryBackend::new());
    let memo = memo_in(MemoStatus::PendingReview);
    let id = memo.id.clone();
    inner.insert_memo(memo).await;

    let backend = Arc::new(ControlledBackend::new(inner));
    backend.ignore_approvals();
    let client = Client::new(backend.clone());

    let err = client.memos.approve(&id, None).await.unwrap_err();
    assert!(
        matches!(
            err,
            ApiError::InvalidTransition {
                from: Some(MemoStatus::PendingReview),
                ..
            }
        ),
        "{:?}",
        err
    );

    // The cache holds what the server answered
    let cached = client.memos.cached(&id).await.unwrap();
    assert_eq!(cached.status, MemoStatus::PendingReview);
    assert!(cached.approved_at.is_none());
}

#[tokio::test]
async fn test_reject_then_re_extract() {
    let (client, _backend, id) = client_with(memo_in(MemoStatus::PendingReview)).await;

    let rejected = client.memos.reject(&id).await.unwrap();
    assert_eq!(rejected.status, MemoStatus::Rejected);

    let memo = client.memos.re_extract(&id).await.unwrap();
    assert_eq!(memo.status, MemoStatus::Extracting);
    assert!(memo.transcript.is_some());
    let extraction = memo.extraction.unwrap();
    assert!(extraction.confidence_scores.is_empty());
    assert_eq!(extraction.company_name.as_deref(), Some("Beta"));
}

#[tokio::test]
async fn test_re_extract_clears_failure() {
    let mut failed = memo_in(MemoStatus::Failed);
    failed.transcript = Some("Spoke with Dana at Beta Inc.".to_string());
    failed.error_message = Some("Extraction timed out".to_string());
    let (client, _backend, id) = client_with(failed).await;

    let memo = client.memos.re_extract(&id).await.unwrap();
    assert_eq!(memo.status, MemoStatus::Extracting);
    assert!(memo.error_message.is_none());
    assert_eq!(memo.invariant_violation(), None);
}

#[tokio::test]
async fn test_re_extract_refused_without_transcript() {
    let (client, backend, id) = client_with(memo_in(MemoStatus::Failed)).await;

    let err = client.memos.re_extract(&id).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)), "{:?}", err);
    assert_eq!(backend.get_memo(&id).await.unwrap().status, MemoStatus::Failed);
}

#[tokio::test]
async fn test_delete_is_idempotent_and_drops_cache() {
    let (client, _backend, id) = client_with(memo_in(MemoStatus::Approved)).await;

    client.memos.get(&id).await.unwrap();
    assert!(client.memos.cached(&id).await.is_some());

    client.memos.delete(&id).await.unwrap();
    assert!(client.memos.cached(&id).await.is_none());

    // Already gone
    client.memos.delete(&id).await.unwrap();

    let err = client.memos.get(&id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_mutations_invalidate_memo_lists() {
    let (client, _backend, id) = client_with(memo_in(MemoStatus::PendingReview)).await;
    let filter = MemoFilter::default().with_status(MemoStatus::PendingReview);

    let listed = client.memos.list(&filter).await.unwrap();
    assert_eq!(listed.len(), 1);
    let key = QueryKey::MemoList(filter.clone());
    assert!(!client.cache().is_stale(&key).await);

    client.memos.approve(&id, None).await.unwrap();
    assert!(client.cache().is_stale(&key).await);

    let listed = client.memos.list(&filter).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_network_failure_leaves_cached_memo() {
    let (client, backend, id) = client_with(memo_in(MemoStatus::PendingReview)).await;
    let before = client.memos.get(&id).await.unwrap();

    backend.fail_next_requests(1);
    let err = client.memos.get(&id).await.unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(client.memos.cached(&id).await, Some(before));
}

#[tokio::test]
async fn test_user_settings_round_trip() {
    let client = Client::new(Arc::new(MemoryBackend::new()));

    let user = client.current_user().await.unwrap();
    assert!(!user.allow_create_records);

    let updated = client.set_allow_create_records(true).await.unwrap();
    assert!(updated.allow_create_records);
    assert!(client.current_user().await.unwrap().allow_create_records);
}

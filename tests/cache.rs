//! Query Cache Integration Tests
//!
//! Ordering of concurrent writes and the invalidation events consumers see.

mod support;

use std::sync::Arc;

use chrono::Utc;
use dealmemo::api::MemoryBackend;
use dealmemo::core::Client;
use dealmemo::domain::{Memo, MemoId, MemoStatus};
use dealmemo::error::ApiError;
use dealmemo::store::{CacheEvent, CachedValue, Mutation, QueryCache, QueryKey};
use support::ControlledBackend;

fn memo(status: MemoStatus) -> Memo {
    let reviewed = status == MemoStatus::PendingReview || status == MemoStatus::Approved;
    Memo {
        id: MemoId::new("memo_cache"),
        user_id: "user_demo".to_string(),
        status,
        audio_url: "memory://audio/call.m4a".to_string(),
        audio_duration_seconds: 30.0,
        transcript: reviewed.then(|| "Quick sync with Acme".to_string()),
        transcript_confidence: None,
        extraction: reviewed.then(Default::default),
        error_message: None,
        created_at: Utc::now(),
        processed_at: None,
        approved_at: (status == MemoStatus::Approved).then(Utc::now),
    }
}

#[tokio::test]
async fn test_poll_response_older_than_mutation_is_discarded() {
    let cache = QueryCache::new();
    let key = QueryKey::Memo(MemoId::new("memo_cache"));

    // A poll starts while the memo is under review...
    let ticket = cache.begin_fetch(key.clone()).await;

    // ...the approval lands first...
    cache
        .set(key.clone(), CachedValue::Memo(memo(MemoStatus::Approved)))
        .await;

    // ...and the poll's older answer arrives late
    let stored = cache
        .complete_fetch(ticket, CachedValue::Memo(memo(MemoStatus::PendingReview)))
        .await;
    assert!(!stored);

    let current = cache.memo(&MemoId::new("memo_cache")).await.unwrap();
    assert_eq!(current.status, MemoStatus::Approved);
}

#[tokio::test]
async fn test_subscribers_see_invalidations() {
    let cache = QueryCache::new();
    let mut events = cache.subscribe();

    let list_key = QueryKey::MemoList(Default::default());
    cache.set(list_key.clone(), CachedValue::Memos(vec![])).await;
    cache
        .set(QueryKey::Connections, CachedValue::Connections(vec![]))
        .await;

    cache.apply(&Mutation::MemoSubmitted).await;

    assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(list_key.clone()));
    assert_eq!(
        events.recv().await.unwrap(),
        CacheEvent::Updated(QueryKey::Connections)
    );
    // Only the list is affected by a submission
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Invalidated(list_key));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_delete_removes_memo_entry() {
    let cache = QueryCache::new();
    let id = MemoId::new("memo_cache");
    cache
        .set(QueryKey::Memo(id.clone()), CachedValue::Memo(memo(MemoStatus::Approved)))
        .await;
    let mut events = cache.subscribe();

    cache.apply(&Mutation::MemoDeleted(id.clone())).await;

    assert_eq!(
        events.recv().await.unwrap(),
        CacheEvent::Removed(QueryKey::Memo(id.clone()))
    );
    assert!(cache.memo(&id).await.is_none());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_service_writes_are_observable() {
    let backend = Arc::new(MemoryBackend::new());
    let approved_id = MemoId::new("memo_cache");
    backend.insert_memo(memo(MemoStatus::PendingReview)).await;

    let client = Client::new(backend);
    let mut events = client.cache().subscribe();

    client.memos.get(&approved_id).await.unwrap();
    client.memos.approve(&approved_id, None).await.unwrap();

    let key = QueryKey::Memo(approved_id.clone());
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(key.clone()));
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(key));

    let cached = client.memos.cached(&approved_id).await.unwrap();
    assert_eq!(cached.status, MemoStatus::Approved);
}

#[tokio::test]
async fn test_fetch_in_flight_survives_refused_action() {
    let inner = Arc::new(MemoryBackend::new());
    inner.insert_memo(memo(MemoStatus::PendingReview)).await;
    let backend = Arc::new(ControlledBackend::new(inner));
    let client = Client::new(backend.clone());

    // The cache still remembers the memo mid-pipeline
    let id = MemoId::new("memo_cache");
    let key = QueryKey::Memo(id.clone());
    client
        .cache()
        .set(key.clone(), CachedValue::Memo(memo(MemoStatus::Extracting)))
        .await;

    backend.hold_fetches();
    let fetch = tokio::spawn({
        let memos = client.memos.clone();
        let id = id.clone();
        async move { memos.get(&id).await }
    });
    backend.fetch_started().await;

    // Approve is refused from the cached status while the fetch is out
    let err = client.memos.approve(&id, None).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::InvalidTransition {
            from: Some(MemoStatus::Extracting),
            ..
        }
    ));

    backend.release_fetch();
    let fetched = fetch.await.unwrap().unwrap();
    assert_eq!(fetched.status, MemoStatus::PendingReview);
    assert!(!client.cache().is_stale(&key).await);
    assert_eq!(
        client.memos.cached(&id).await.unwrap().status,
        MemoStatus::PendingReview
    );

    let approved = client.memos.approve(&id, None).await.unwrap();
    assert_eq!(approved.status, MemoStatus::Approved);
}

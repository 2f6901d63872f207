//! Client-side cache of server data.
//!
//! Entries are keyed by [`QueryKey`]. Each key carries a write generation:
//! a fetch remembers the generation it started under and its result is
//! dropped if a mutation response was written in the meantime, or if the
//! entry was removed. Invalidation only marks an entry stale; a fetch that
//! completes afterwards is the newest server answer and is stored.
//!
//! Invalidations are published on a broadcast channel so long-lived
//! consumers can re-query.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::api::MemoFilter;
use crate::domain::{CrmConnection, CrmProvider, DealSchema, Memo, MemoId, User};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identity of one cached query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Memo(MemoId),
    MemoList(MemoFilter),
    Connections,
    Connection(CrmProvider),
    DealSchema(CrmProvider),
    CurrentUser,
}

/// Cached server response
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Memo(Memo),
    Memos(Vec<Memo>),
    Connections(Vec<CrmConnection>),
    Connection(Option<CrmConnection>),
    DealSchema(DealSchema),
    User(User),
}

/// A mutation that succeeded on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    MemoSubmitted,
    MemoUpdated(MemoId),
    MemoDeleted(MemoId),
    CrmConnected(CrmProvider),
    CrmDisconnected(CrmProvider),
    UserUpdated,
}

impl Mutation {
    /// Whether this mutation makes the cached value under `key` stale
    pub fn invalidates(&self, key: &QueryKey) -> bool {
        match (self, key) {
            (Mutation::MemoSubmitted, QueryKey::MemoList(_)) => true,
            (Mutation::MemoUpdated(_), QueryKey::MemoList(_)) => true,
            (Mutation::MemoDeleted(_), QueryKey::MemoList(_)) => true,
            (Mutation::MemoDeleted(id), QueryKey::Memo(key_id)) => id == key_id,
            (
                Mutation::CrmConnected(provider) | Mutation::CrmDisconnected(provider),
                key,
            ) => match key {
                QueryKey::Connections => true,
                QueryKey::Connection(p) | QueryKey::DealSchema(p) => p == provider,
                _ => false,
            },
            (Mutation::UserUpdated, QueryKey::CurrentUser) => true,
            _ => false,
        }
    }
}

/// Notifications published by the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
    Removed(QueryKey),
}

/// Proof of when a fetch started, redeemed by [`QueryCache::complete_fetch`]
#[derive(Debug, Clone)]
pub struct FetchTicket {
    key: QueryKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

#[derive(Debug)]
struct Entry {
    value: Option<CachedValue>,
    generation: u64,
    stale: bool,
}

impl Entry {
    fn empty(generation: u64) -> Self {
        Self {
            value: None,
            generation,
            stale: true,
        }
    }
}

/// Explicit query cache with generation-checked writes
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    events: broadcast::Sender<CacheEvent>,
    /// Cache-wide so a re-created entry never reuses a removed one's generation
    generations: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
            generations: AtomicU64::new(0),
        }
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn publish(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Current value, stale or not
    pub async fn get(&self, key: &QueryKey) -> Option<CachedValue> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|e| e.value.clone())
    }

    /// Value only if it has not been invalidated since it was written
    pub async fn get_fresh(&self, key: &QueryKey) -> Option<CachedValue> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| !e.stale)
            .and_then(|e| e.value.clone())
    }

    pub async fn is_stale(&self, key: &QueryKey) -> bool {
        let entries = self.entries.lock().await;
        entries.get(key).map_or(true, |e| e.stale)
    }

    /// Register the start of a fetch for `key`
    pub async fn begin_fetch(&self, key: QueryKey) -> FetchTicket {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::empty(self.next_generation()));
        FetchTicket {
            key,
            generation: entry.generation,
        }
    }

    /// Store a fetch result unless a mutation response was written or the
    /// entry removed after the fetch began. Returns whether the value was
    /// stored.
    pub async fn complete_fetch(&self, ticket: FetchTicket, value: CachedValue) -> bool {
        let stored = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(&ticket.key) {
                Some(entry) if entry.generation == ticket.generation => {
                    entry.value = Some(value);
                    entry.stale = false;
                    true
                }
                Some(_) => {
                    warn!(key = ?ticket.key, "Discarding response older than a write");
                    false
                }
                None => {
                    debug!(key = ?ticket.key, "Discarding response for removed entry");
                    false
                }
            }
        };

        if stored {
            self.publish(CacheEvent::Updated(ticket.key));
        }
        stored
    }

    /// Write an authoritative value (e.g. a mutation response), superseding
    /// any fetch already in flight for the key
    pub async fn set(&self, key: QueryKey, value: CachedValue) {
        {
            let generation = self.next_generation();
            let mut entries = self.entries.lock().await;
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::empty(generation));
            entry.generation = generation;
            entry.value = Some(value);
            entry.stale = false;
        }
        self.publish(CacheEvent::Updated(key));
    }

    /// Mark `key` stale; cached data stays readable until re-fetched.
    /// Fetches already in flight still land.
    pub async fn invalidate(&self, key: &QueryKey) {
        let existed = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.stale = true;
                    true
                }
                None => false,
            }
        };

        if existed {
            debug!(?key, "Invalidated");
            self.publish(CacheEvent::Invalidated(key.clone()));
        }
    }

    /// Drop `key` entirely
    pub async fn remove(&self, key: &QueryKey) {
        let existed = self.entries.lock().await.remove(key).is_some();
        if existed {
            self.publish(CacheEvent::Removed(key.clone()));
        }
    }

    /// Invalidate every key affected by a successful mutation
    pub async fn apply(&self, mutation: &Mutation) {
        let affected: Vec<QueryKey> = {
            let entries = self.entries.lock().await;
            entries
                .keys()
                .filter(|k| mutation.invalidates(k))
                .cloned()
                .collect()
        };

        for key in affected {
            match (mutation, &key) {
                (Mutation::MemoDeleted(_), QueryKey::Memo(_)) => self.remove(&key).await,
                _ => self.invalidate(&key).await,
            }
        }
    }

    /// Cached memo, if any
    pub async fn memo(&self, id: &MemoId) -> Option<Memo> {
        match self.get(&QueryKey::Memo(id.clone())).await {
            Some(CachedValue::Memo(memo)) => Some(memo),
            _ => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connections() -> CachedValue {
        CachedValue::Connections(vec![])
    }

    #[tokio::test]
    async fn test_fetch_result_stored() {
        let cache = QueryCache::new();
        let ticket = cache.begin_fetch(QueryKey::Connections).await;

        assert!(cache.complete_fetch(ticket, connections()).await);
        assert_eq!(cache.get_fresh(&QueryKey::Connections).await, Some(connections()));
    }

    #[tokio::test]
    async fn test_fetch_after_invalidation_is_stored_fresh() {
        let cache = QueryCache::new();
        cache.set(QueryKey::Connections, connections()).await;
        let ticket = cache.begin_fetch(QueryKey::Connections).await;

        cache.invalidate(&QueryKey::Connections).await;
        let newer = CachedValue::Connection(None);
        assert!(cache.complete_fetch(ticket, newer.clone()).await);
        assert!(!cache.is_stale(&QueryKey::Connections).await);
        assert_eq!(cache.get(&QueryKey::Connections).await, Some(newer));
    }

    #[tokio::test]
    async fn test_fetch_superseded_by_write_is_discarded() {
        let cache = QueryCache::new();
        let ticket = cache.begin_fetch(QueryKey::Connections).await;

        cache.set(QueryKey::Connections, connections()).await;
        assert!(!cache
            .complete_fetch(ticket, CachedValue::Connection(None))
            .await);
        assert_eq!(cache.get(&QueryKey::Connections).await, Some(connections()));
    }

    #[tokio::test]
    async fn test_fetch_for_removed_entry_is_discarded() {
        let cache = QueryCache::new();
        let ticket = cache.begin_fetch(QueryKey::Connections).await;
        cache.remove(&QueryKey::Connections).await;

        // A later fetch re-creates the entry; the old ticket still does not match
        let _ = cache.begin_fetch(QueryKey::Connections).await;
        assert!(!cache.complete_fetch(ticket, connections()).await);
        assert!(cache.get(&QueryKey::Connections).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidation_keeps_data_readable() {
        let cache = QueryCache::new();
        cache.set(QueryKey::Connections, connections()).await;
        cache.invalidate(&QueryKey::Connections).await;

        assert!(cache.is_stale(&QueryKey::Connections).await);
        assert!(cache.get_fresh(&QueryKey::Connections).await.is_none());
        assert_eq!(cache.get(&QueryKey::Connections).await, Some(connections()));
    }

    #[test]
    fn test_invalidation_rules() {
        let id = MemoId::from("m_1");
        let other = MemoId::from("m_2");
        let list = QueryKey::MemoList(MemoFilter::default());

        assert!(Mutation::MemoSubmitted.invalidates(&list));
        assert!(!Mutation::MemoSubmitted.invalidates(&QueryKey::Memo(id.clone())));
        assert!(Mutation::MemoUpdated(id.clone()).invalidates(&list));
        assert!(Mutation::MemoDeleted(id.clone()).invalidates(&QueryKey::Memo(id.clone())));
        assert!(!Mutation::MemoDeleted(id).invalidates(&QueryKey::Memo(other)));

        let connected = Mutation::CrmConnected(CrmProvider::Hubspot);
        assert!(connected.invalidates(&QueryKey::Connections));
        assert!(connected.invalidates(&QueryKey::Connection(CrmProvider::Hubspot)));
        assert!(connected.invalidates(&QueryKey::DealSchema(CrmProvider::Hubspot)));
        assert!(!connected.invalidates(&QueryKey::Connection(CrmProvider::Salesforce)));
        assert!(!connected.invalidates(&QueryKey::CurrentUser));
    }
}

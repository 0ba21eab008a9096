//! Query cache store
//!
//! All entry state lives in one [`CacheStore`] behind a `tokio::sync::RwLock`.
//! Every operation mutates the store inside a single lock scope and never
//! awaits a fetch while holding it: fetches run on spawned tasks and apply
//! their result by re-acquiring the lock. Observers receive entry snapshots
//! through a `watch` channel per entry, so a reaction to a notification that
//! calls back into the cache simply queues on the lock.

use crate::cache::{
    config::QueryCacheConfig,
    entry::CacheEntry,
    fingerprint::Fingerprint,
    invalidation::{InvalidationReason, InvalidationReport, NamespaceInvalidation},
    types::{CacheStats, QueryResult},
};
use crate::error::{ErrorKind, Result};
use crate::hydration::{DehydratedQuery, DehydratedState};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Boxed future returned by a fetch function
pub type FetchFuture<T> = BoxFuture<'static, Result<QueryResult<T>>>;

/// Re-invocable fetch function stored with its entry for refetches
pub type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// Wrap an async closure as a [`FetchFn`]
pub fn fetch_fn<T, F, Fut>(f: F) -> FetchFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<QueryResult<T>>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

type SharedStore<T> = Arc<RwLock<CacheStore<T>>>;

/// Process-wide query cache
///
/// Create one with [`QueryCache::new`] and tear it down with
/// [`QueryCache::clear`]; clones share the same store.
pub struct QueryCache<T> {
    store: SharedStore<T>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

/// Internal cache storage
struct CacheStore<T> {
    config: QueryCacheConfig,

    /// Main storage: stable fingerprint key -> slot
    entries: HashMap<String, Slot<T>>,

    stats: CacheStats,

    /// Identifies slot incarnations so late completions can be discarded
    next_slot_id: u64,
}

/// One entry plus the machinery around it
struct Slot<T> {
    id: u64,
    entry: CacheEntry<T>,
    fetch: Option<FetchFn<T>>,
    sender: watch::Sender<CacheEntry<T>>,
    /// Invalidated while a fetch was in flight
    stale_in_flight: bool,
    eviction: Option<JoinHandle<()>>,
}

impl<T: Clone> Slot<T> {
    fn new(id: u64, entry: CacheEntry<T>) -> Self {
        let (sender, _) = watch::channel(entry.clone());
        Self {
            id,
            entry,
            fetch: None,
            sender,
            stale_in_flight: false,
            eviction: None,
        }
    }

    fn publish(&self) {
        self.sender.send_replace(self.entry.clone());
    }

    fn cancel_eviction(&mut self) -> bool {
        match self.eviction.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// A view's handle on one cache entry
///
/// Dropping a subscription does not release it; call
/// [`QueryCache::release`] with its fingerprint.
pub struct Subscription<T> {
    fingerprint: Fingerprint,
    receiver: watch::Receiver<CacheEntry<T>>,
}

impl<T: Clone> Subscription<T> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Current state of the entry
    pub fn snapshot(&self) -> CacheEntry<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next transition; `None` once the entry is gone
    pub async fn changed(&mut self) -> Option<CacheEntry<T>> {
        match self.receiver.changed().await {
            Ok(()) => Some(self.receiver.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Wait until no fetch is outstanding and return that state
    pub async fn settled(&mut self) -> CacheEntry<T> {
        loop {
            let snapshot = self.receiver.borrow_and_update().clone();
            if !snapshot.is_fetching() {
                return snapshot;
            }
            if self.receiver.changed().await.is_err() {
                return self.receiver.borrow().clone();
            }
        }
    }
}

impl<T> QueryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty cache
    pub fn new(config: QueryCacheConfig) -> Self {
        info!("Initializing query cache with config: {:?}", config);

        let store = CacheStore {
            config,
            entries: HashMap::new(),
            stats: CacheStats::default(),
            next_slot_id: 0,
        };

        Self {
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Subscribe to `fingerprint`, fetching when there is no usable entry
    ///
    /// An existing entry is shared: while its fetch is in flight every new
    /// subscriber attaches to that fetch instead of issuing another one.
    pub async fn get_or_fetch(&self, fingerprint: Fingerprint, fetch: FetchFn<T>) -> Subscription<T> {
        let key = fingerprint.stable_key();
        let mut store = self.store.write().await;

        let created = !store.entries.contains_key(&key);
        let next_id = store.next_slot_id;

        let slot = store
            .entries
            .entry(key.clone())
            .or_insert_with(|| Slot::new(next_id, CacheEntry::pending(fingerprint.clone())));
        slot.entry.subscriber_count += 1;
        if slot.cancel_eviction() {
            debug!("Cancelled eviction of {}", key);
        }
        slot.fetch = Some(fetch);
        let needs_fetch = slot.entry.needs_fetch();
        let receiver = slot.sender.subscribe();

        if created {
            debug!("Cache miss: {}", key);
            store.next_slot_id += 1;
        } else {
            debug!("Cache hit: {}", key);
        }
        if store.config.enable_metrics {
            if created {
                store.stats.misses += 1;
            } else {
                store.stats.hits += 1;
            }
        }

        if !needs_fetch || !store.start_fetch(&self.store, &key, !created) {
            store.publish(&key);
        }

        Subscription {
            fingerprint,
            receiver,
        }
    }

    /// Drop one subscriber of `fingerprint`
    ///
    /// At zero subscribers the entry is evicted after the grace period
    /// unless someone subscribes again first.
    pub async fn release(&self, fingerprint: &Fingerprint) {
        let key = fingerprint.stable_key();
        let mut store = self.store.write().await;

        let Some(slot) = store.entries.get_mut(&key) else {
            debug!("Release of unknown entry: {}", key);
            return;
        };
        if slot.entry.subscriber_count == 0 {
            warn!("Release without subscription: {}", key);
            return;
        }

        slot.entry.subscriber_count -= 1;
        slot.publish();
        if slot.entry.subscriber_count == 0 {
            store.schedule_eviction(&self.store, &key);
        }
    }

    /// Invalidate every entry in the namespace of `event`
    ///
    /// Subscribed entries move back to pending and refetch while keeping
    /// `last_data`; unsubscribed entries lose their data.
    pub async fn invalidate(
        &self,
        event: NamespaceInvalidation,
        reason: InvalidationReason,
    ) -> InvalidationReport {
        let mut store = self.store.write().await;
        let mut report = InvalidationReport::new(reason);

        let keys: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, slot)| event.matches(&slot.entry.fingerprint))
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys {
            let Some(slot) = store.entries.get_mut(&key) else {
                continue;
            };
            let fingerprint = slot.entry.fingerprint.clone();
            let subscribed = slot.entry.subscriber_count > 0;
            let fetching = slot.entry.is_fetching();
            slot.entry.invalidated = true;

            match (subscribed, fetching) {
                (true, true) => {
                    slot.stale_in_flight = true;
                    report.deferred.push(fingerprint);
                }
                (false, true) => {
                    slot.stale_in_flight = true;
                    slot.entry.drop_data();
                    report.dropped.push(fingerprint);
                }
                (false, false) => {
                    slot.entry.drop_data();
                    slot.publish();
                    report.dropped.push(fingerprint);
                }
                (true, false) => {
                    if store.start_fetch(&self.store, &key, true) {
                        report.refetched.push(fingerprint);
                    } else {
                        store.drop_and_publish(&key);
                        report.dropped.push(fingerprint);
                    }
                }
            }

            if store.config.enable_metrics {
                store.stats.invalidations += 1;
            }
        }

        info!(
            "Invalidated {} entries ({}) matching {}: {} refetched, {} deferred, {} dropped",
            report.matched(),
            report.reason,
            event,
            report.refetched.len(),
            report.deferred.len(),
            report.dropped.len()
        );

        report
    }

    /// Refetch a subscribed entry now (e.g. retry after an error)
    ///
    /// Returns `false` when the entry is unknown, unsubscribed, or already
    /// fetching.
    pub async fn refetch(&self, fingerprint: &Fingerprint) -> bool {
        let key = fingerprint.stable_key();
        let mut store = self.store.write().await;

        match store.entries.get(&key) {
            Some(slot) if slot.entry.subscriber_count > 0 && !slot.entry.is_fetching() => {
                store.start_fetch(&self.store, &key, true)
            }
            _ => false,
        }
    }

    /// Seed entries from a server snapshot
    ///
    /// Entries that already hold data are left alone. Seeded entries have no
    /// subscribers yet, so their grace timer starts immediately.
    pub async fn hydrate(&self, state: DehydratedState<T>) -> usize {
        let mut store = self.store.write().await;
        let mut seeded = 0;

        for query in state.queries {
            let key = query.fingerprint.stable_key();
            if key != query.key {
                warn!("Skipping hydrated query with mismatched key: {} != {}", query.key, key);
                continue;
            }

            let occupied = store
                .entries
                .get(&key)
                .map(|slot| slot.entry.data.is_some() || slot.entry.is_fetching())
                .unwrap_or(false);
            if occupied {
                debug!("Hydration skipped, entry already populated: {}", key);
                continue;
            }

            let id = store.next_slot_id;
            store.next_slot_id += 1;
            let entry = CacheEntry::with_data(query.fingerprint, query.data);

            match store.entries.get_mut(&key) {
                // Keep the channel so existing subscribers see the data
                Some(slot) => {
                    let subscribers = slot.entry.subscriber_count;
                    slot.entry = entry;
                    slot.entry.subscriber_count = subscribers;
                    slot.publish();
                }
                None => {
                    store.entries.insert(key.clone(), Slot::new(id, entry));
                }
            }

            let unsubscribed = store
                .entries
                .get(&key)
                .map(|slot| slot.entry.subscriber_count == 0)
                .unwrap_or(false);
            if unsubscribed {
                store.schedule_eviction(&self.store, &key);
            }

            debug!("Hydrated entry: {}", key);
            seeded += 1;
        }

        if store.config.enable_metrics {
            store.stats.hydrated += seeded as u64;
        }
        info!("Hydrated {} entries into query cache", seeded);

        seeded
    }

    /// Snapshot every successful entry
    pub async fn dehydrate(&self) -> DehydratedState<T> {
        let store = self.store.read().await;
        let mut queries: Vec<DehydratedQuery<T>> = store
            .entries
            .iter()
            .filter_map(|(key, slot)| {
                slot.entry.data.clone().map(|data| DehydratedQuery {
                    key: key.clone(),
                    fingerprint: slot.entry.fingerprint.clone(),
                    data,
                })
            })
            .collect();
        queries.sort_by(|a, b| a.key.cmp(&b.key));

        DehydratedState { queries }
    }

    /// Current state of an entry, without subscribing
    pub async fn entry(&self, fingerprint: &Fingerprint) -> Option<CacheEntry<T>> {
        let store = self.store.read().await;
        store
            .entries
            .get(&fingerprint.stable_key())
            .map(|slot| slot.entry.clone())
    }

    /// Check if an entry exists for `fingerprint`
    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        let store = self.store.read().await;
        store.entries.contains_key(&fingerprint.stable_key())
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        let mut stats = store.stats.clone();
        stats.entries = store.entries.len();
        stats
    }

    /// Get number of entries in cache
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        let store = self.store.read().await;
        store.entries.is_empty()
    }

    /// Tear down: drop every entry and cancel every grace timer
    ///
    /// Subscriptions observe their channel closing. Fetches still in flight
    /// complete but their results are discarded.
    pub async fn clear(&self) {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        for (_, mut slot) in store.entries.drain() {
            slot.cancel_eviction();
        }

        info!("Cleared {} entries from query cache", count);
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn publish(&self, key: &str) {
        if let Some(slot) = self.entries.get(key) {
            slot.publish();
        }
    }

    fn drop_and_publish(&mut self, key: &str) {
        if let Some(slot) = self.entries.get_mut(key) {
            slot.entry.drop_data();
            slot.publish();
        }
    }

    /// Start the stored fetch for `key` on a spawned task
    fn start_fetch(&mut self, handle: &SharedStore<T>, key: &str, refetch: bool) -> bool {
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        let Some(fetch) = slot.fetch.clone() else {
            warn!("No fetch function registered for {}", key);
            return false;
        };

        slot.entry.begin_fetch();
        slot.stale_in_flight = false;
        slot.publish();
        let slot_id = slot.id;

        if self.config.enable_metrics {
            self.stats.fetches += 1;
            if refetch {
                self.stats.refetches += 1;
            }
        }
        debug!("Fetching {} (refetch: {})", key, refetch);

        let handle = Arc::clone(handle);
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = fetch().await;
            let mut store = handle.write().await;
            store.complete_fetch(&handle, &key, slot_id, outcome);
        });

        true
    }

    /// Apply a fetch outcome to the slot that issued it
    fn complete_fetch(
        &mut self,
        handle: &SharedStore<T>,
        key: &str,
        slot_id: u64,
        outcome: Result<QueryResult<T>>,
    ) {
        let policy = self.config.refetch_failure_policy;
        let Some(slot) = self.entries.get_mut(key).filter(|slot| slot.id == slot_id) else {
            debug!("Discarding fetch result for evicted entry: {}", key);
            if self.config.enable_metrics {
                self.stats.discarded_results += 1;
            }
            return;
        };

        let failed = outcome.is_err();
        match outcome {
            Ok(result) => {
                debug!("Fetched {} ({} items)", key, result.len());
                slot.entry.resolve(result);
            }
            Err(e) => {
                warn!("Fetch failed for {}: {}", key, e);
                slot.entry.reject(ErrorKind::classify(&e), policy);
            }
        }

        let stale = std::mem::take(&mut slot.stale_in_flight);
        let subscribed = slot.entry.subscriber_count > 0;
        if stale && !subscribed {
            slot.entry.drop_data();
        }

        if failed && self.config.enable_metrics {
            self.stats.failures += 1;
        }

        // The landed result predates an invalidation; fetch once more
        if stale && subscribed && self.start_fetch(handle, key, true) {
            return;
        }
        self.publish(key);
    }

    /// Evict `key` after the grace period if it is still unsubscribed
    fn schedule_eviction(&mut self, handle: &SharedStore<T>, key: &str) {
        let grace = self.config.gc_grace;
        let Some(slot) = self.entries.get_mut(key) else {
            return;
        };
        slot.cancel_eviction();

        let slot_id = slot.id;
        let handle_for_task = Arc::clone(handle);
        let key_owned = key.to_string();
        slot.eviction = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut store = handle_for_task.write().await;
            store.evict_if_idle(&key_owned, slot_id);
        }));

        debug!("Scheduled eviction of {} in {:?}", key, grace);
    }

    fn evict_if_idle(&mut self, key: &str, slot_id: u64) {
        let idle = self
            .entries
            .get(key)
            .map(|slot| slot.id == slot_id && slot.entry.subscriber_count == 0)
            .unwrap_or(false);
        if !idle {
            return;
        }

        self.entries.remove(key);
        if self.config.enable_metrics {
            self.stats.evictions += 1;
        }
        debug!("Evicted idle entry: {}", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::invalidation::RefetchFailurePolicy;
    use crate::cache::types::QueryStatus;
    use crate::error::NotesError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn counting_fetch(counter: Arc<AtomicUsize>, items: Vec<u32>) -> FetchFn<u32> {
        fetch_fn(move || {
            let counter = Arc::clone(&counter);
            let items = items.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let total = items.len() as u64;
                Ok(QueryResult::new(items, 1, total))
            }
        })
    }

    /// Fetch that waits for `gate` before answering with the call number
    fn gated_fetch(counter: Arc<AtomicUsize>, gate: Arc<Notify>) -> FetchFn<u32> {
        fetch_fn(move || {
            let counter = Arc::clone(&counter);
            let gate = Arc::clone(&gate);
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
                gate.notified().await;
                Ok(QueryResult::new(vec![call], 1, 1))
            }
        })
    }

    fn failing_fetch() -> FetchFn<u32> {
        fetch_fn(|| async { Err(NotesError::Network("backend unreachable".to_string())) })
    }

    fn cache() -> QueryCache<u32> {
        QueryCache::new(QueryCacheConfig::testing())
    }

    #[tokio::test]
    async fn test_get_or_fetch_resolves() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(None, 1);

        let mut sub = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![1, 2, 3]))
            .await;
        let entry = sub.settled().await;

        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(entry.data.as_ref().map(|d| d.items.clone()), Some(vec![1, 2, 3]));
        assert_eq!(entry.subscriber_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_single_in_flight_fetch() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let fp = Fingerprint::notes(Some("x"), 1);

        let mut first = cache
            .get_or_fetch(fp.clone(), gated_fetch(calls.clone(), gate.clone()))
            .await;
        let mut second = cache
            .get_or_fetch(fp.clone(), gated_fetch(calls.clone(), gate.clone()))
            .await;

        assert!(second.snapshot().is_fetching());
        assert_eq!(second.snapshot().subscriber_count, 2);

        // Let the spawned fetch reach the gate before opening it
        tokio::task::yield_now().await;
        gate.notify_one();

        let a = first.settled().await;
        let b = second.settled().await;
        assert_eq!(a.data, b.data);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_success_entry_is_reused_without_fetch() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(None, 1);

        let mut sub = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![1]))
            .await;
        sub.settled().await;

        let again = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![1]))
            .await;
        assert_eq!(again.snapshot().status, QueryStatus::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_is_classified_and_retried_on_resubscribe() {
        let cache = cache();
        let fp = Fingerprint::notes(None, 1);

        let mut sub = cache.get_or_fetch(fp.clone(), failing_fetch()).await;
        let entry = sub.settled().await;
        assert_eq!(entry.status, QueryStatus::Error);
        assert!(matches!(entry.error, Some(ErrorKind::Network(_))));
        assert!(entry.data.is_none());

        let calls = Arc::new(AtomicUsize::new(0));
        let mut retry = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![9]))
            .await;
        let entry = retry.settled().await;
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.failures, 1);
    }

    #[tokio::test]
    async fn test_invalidate_refetches_subscribed_with_placeholder() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let fp = Fingerprint::notes(None, 1);

        let mut sub = cache
            .get_or_fetch(fp.clone(), gated_fetch(calls.clone(), gate.clone()))
            .await;
        tokio::task::yield_now().await;
        gate.notify_one();
        let first = sub.settled().await;
        assert_eq!(first.data.as_ref().map(|d| d.items.clone()), Some(vec![1]));

        let report = cache
            .invalidate(NamespaceInvalidation::notes(), InvalidationReason::Manual)
            .await;
        assert_eq!(report.refetched, vec![fp.clone()]);

        let during = sub.snapshot();
        assert_eq!(during.status, QueryStatus::Pending);
        assert!(during.is_fetching());
        assert_eq!(during.visible_data().map(|d| d.items.clone()), Some(vec![1]));

        tokio::task::yield_now().await;
        gate.notify_one();
        let after = sub.settled().await;
        assert_eq!(after.data.as_ref().map(|d| d.items.clone()), Some(vec![2]));
        assert!(!after.invalidated);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_drops_unsubscribed() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(None, 3);

        let mut sub = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![3]))
            .await;
        sub.settled().await;
        cache.release(&fp).await;

        let report = cache
            .invalidate(NamespaceInvalidation::notes(), InvalidationReason::Manual)
            .await;
        assert_eq!(report.dropped, vec![fp.clone()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entry = cache.entry(&fp).await.unwrap();
        assert_eq!(entry.status, QueryStatus::Pending);
        assert!(entry.data.is_none());
        assert!(entry.last_data.is_some());

        let mut again = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![3]))
            .await;
        again.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_flight_is_deferred() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let fp = Fingerprint::notes(None, 1);

        let mut sub = cache
            .get_or_fetch(fp.clone(), gated_fetch(calls.clone(), gate.clone()))
            .await;
        let report = cache
            .invalidate(NamespaceInvalidation::notes(), InvalidationReason::Manual)
            .await;
        assert_eq!(report.deferred, vec![fp.clone()]);

        gate.notify_one();
        // First completion triggers exactly one follow-up fetch
        loop {
            let snapshot = sub.changed().await.unwrap();
            if snapshot.metadata.fetch_count == 2 {
                assert!(snapshot.is_fetching());
                break;
            }
        }
        gate.notify_one();

        let entry = sub.settled().await;
        assert_eq!(entry.data.as_ref().map(|d| d.items.clone()), Some(vec![2]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refetch_policies() {
        for policy in [RefetchFailurePolicy::SurfaceError, RefetchFailurePolicy::KeepLastGood] {
            let config = QueryCacheConfig::builder()
                .gc_grace(Duration::from_secs(1))
                .refetch_failure_policy(policy)
                .build();
            let cache: QueryCache<u32> = QueryCache::new(config);
            let fp = Fingerprint::notes(None, 1);
            let calls = Arc::new(AtomicUsize::new(0));

            let flaky = {
                let calls = calls.clone();
                fetch_fn(move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Ok(QueryResult::new(vec![1], 1, 1))
                        } else {
                            Err(NotesError::Network("flaky".to_string()))
                        }
                    }
                })
            };

            let mut sub = cache.get_or_fetch(fp.clone(), flaky).await;
            sub.settled().await;
            cache
                .invalidate(NamespaceInvalidation::notes(), InvalidationReason::Manual)
                .await;
            let entry = sub.settled().await;

            match policy {
                RefetchFailurePolicy::SurfaceError => {
                    assert_eq!(entry.status, QueryStatus::Error);
                    assert_eq!(entry.visible_data().map(|d| d.items.clone()), Some(vec![1]));
                }
                RefetchFailurePolicy::KeepLastGood => {
                    assert_eq!(entry.status, QueryStatus::Success);
                    assert_eq!(entry.data.as_ref().map(|d| d.items.clone()), Some(vec![1]));
                }
            }
            assert!(entry.is_consistent());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_after_grace() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(None, 1);

        let mut sub = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![1]))
            .await;
        sub.settled().await;
        cache.release(&fp).await;
        assert!(cache.contains(&fp).await);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!cache.contains(&fp).await);
        assert_eq!(cache.stats().await.evictions, 1);
        // Drains the unseen release snapshot, then observes the closed channel
        while sub.changed().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_within_grace_cancels_eviction() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(None, 1);

        let mut sub = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![1]))
            .await;
        sub.settled().await;
        cache.release(&fp).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let again = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![1]))
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(cache.contains(&fp).await);
        assert_eq!(again.snapshot().subscriber_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_result_after_clear_is_discarded() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let fp = Fingerprint::notes(None, 1);

        let _sub = cache
            .get_or_fetch(fp.clone(), gated_fetch(calls.clone(), gate.clone()))
            .await;
        cache.clear().await;
        assert!(cache.is_empty().await);

        tokio::task::yield_now().await;
        gate.notify_one();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!cache.contains(&fp).await);
        assert_eq!(cache.stats().await.discarded_results, 1);
    }

    #[tokio::test]
    async fn test_release_without_subscription_is_ignored() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(None, 1);

        cache.release(&fp).await;

        let mut sub = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls, vec![1]))
            .await;
        sub.settled().await;
        cache.release(&fp).await;
        cache.release(&fp).await;
        assert_eq!(cache.entry(&fp).await.unwrap().subscriber_count, 0);
    }

    #[tokio::test]
    async fn test_refetch_only_when_subscribed_and_idle() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(None, 1);

        assert!(!cache.refetch(&fp).await);

        let mut sub = cache
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![1]))
            .await;
        sub.settled().await;
        assert!(cache.refetch(&fp).await);
        sub.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hydrate_and_dehydrate() {
        let source = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = Fingerprint::notes(Some("foo"), 2);

        let mut sub = source
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![4, 5]))
            .await;
        sub.settled().await;
        let state = source.dehydrate().await;
        assert_eq!(state.queries.len(), 1);

        let target = cache();
        assert_eq!(target.hydrate(state).await, 1);

        let sub = target
            .get_or_fetch(fp.clone(), counting_fetch(calls.clone(), vec![0]))
            .await;
        let entry = sub.snapshot();
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(entry.data.map(|d| d.items), Some(vec![4, 5]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(target.stats().await.hydrated, 1);
    }
}

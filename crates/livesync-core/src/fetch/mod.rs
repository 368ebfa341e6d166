// ── Single-flight fetch coordination ──
//
// Serves fresh cache hits, otherwise pulls from the network with at most
// one outstanding fetch per resource. A newer request cancels the older
// one (last-request-wins, not last-arrival-wins); the older caller then
// receives the newer request's outcome instead of a result of its own.

mod cache;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub use cache::{CacheEntry, ResponseCache};

use crate::error::CoreError;
use crate::model::{ResourceKey, Snapshot, SnapshotSource};

/// How a refresh was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Bypass a fresh cache entry and surface failures to the caller.
    pub force: bool,
    /// Bypass a fresh cache entry but stay silent on transient failure.
    pub revalidate: bool,
    pub source: SnapshotSource,
}

impl RefreshOptions {
    /// Cache-first and silent on transient failure. Used when a view
    /// becomes active.
    pub fn background(source: SnapshotSource) -> Self {
        Self {
            force: false,
            revalidate: false,
            source,
        }
    }

    /// A change signal or poll tick: the cached copy may be outdated
    /// regardless of age, so always pull, but keep failures silent.
    pub fn revalidate(source: SnapshotSource) -> Self {
        Self {
            force: false,
            revalidate: true,
            source,
        }
    }

    /// A user-initiated refresh: always hits the network, surfaces errors.
    pub fn manual() -> Self {
        Self {
            force: true,
            revalidate: true,
            source: SnapshotSource::Manual,
        }
    }

    fn bypasses_cache(self) -> bool {
        self.force || self.revalidate
    }
}

/// The active fetch for a key. Replacing it cancels the previous one.
struct InFlight {
    generation: u64,
    force: bool,
    cancel: CancellationToken,
}

/// Raw outcome of the newest fetch for a key, before the caller's own
/// failure policy is applied.
struct Settled<T> {
    generation: u64,
    result: Result<Snapshot<T>, CoreError>,
}

/// Single-flight orchestrator over a shared [`ResponseCache`].
pub struct FetchCoordinator<T> {
    cache: Arc<ResponseCache<T>>,
    default_max_age: Duration,
    max_ages: DashMap<ResourceKey, Duration>,
    in_flight: DashMap<ResourceKey, InFlight>,
    /// Held for the duration of a network pull. A superseding fetch waits
    /// here until the cancelled one has dropped its future.
    slots: DashMap<ResourceKey, Arc<Mutex<()>>>,
    settled: DashMap<ResourceKey, watch::Sender<Option<Settled<T>>>>,
    next_generation: AtomicU64,
}

impl<T> FetchCoordinator<T> {
    pub fn new(cache: Arc<ResponseCache<T>>, default_max_age: Duration) -> Self {
        Self {
            cache,
            default_max_age,
            max_ages: DashMap::new(),
            in_flight: DashMap::new(),
            slots: DashMap::new(),
            settled: DashMap::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache<T>> {
        &self.cache
    }

    /// Override the freshness window for one resource.
    pub fn set_max_age(&self, key: ResourceKey, max_age: Duration) {
        self.max_ages.insert(key, max_age);
    }

    pub fn max_age(&self, key: &str) -> Duration {
        self.max_ages
            .get(key)
            .map_or(self.default_max_age, |d| *d.value())
    }

    /// Whether a fetch token is currently outstanding for `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// The cached snapshot regardless of freshness (stale-while-revalidate).
    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.cache.get(key)
    }

    /// Cancel whatever fetch is outstanding for `key` without issuing a new one.
    /// Callers waiting on it get [`CoreError::Superseded`].
    pub fn cancel(&self, key: &ResourceKey) {
        if let Some((_, prev)) = self.in_flight.remove(key) {
            prev.cancel.cancel();
            self.settle(key, prev.generation, Err(superseded(key)));
        }
    }

    /// Return the snapshot for `key`, pulling it with `fetcher` if needed.
    ///
    /// 1. A fresh entry is returned without calling `fetcher`, unless the
    ///    options bypass the cache.
    /// 2. A non-forced request arriving while a forced fetch is in flight
    ///    joins that fetch. Otherwise any fetch in flight for `key` is
    ///    cancelled and its caller waits for this one instead.
    /// 3. `fetcher` runs once this request owns the key's slot; a success
    ///    is cached with the key's max age.
    /// 4. A forced refresh surfaces every failure. A background refresh
    ///    swallows transient failures while a last good snapshot exists.
    ///
    /// A request that is cancelled or joins another adopts the outcome of
    /// the newer fetch, filtered through its own options from step 4. Only
    /// when that fetch is itself abandoned does it return
    /// [`CoreError::Superseded`].
    pub async fn refresh<F, Fut>(
        &self,
        key: &ResourceKey,
        opts: RefreshOptions,
        fetcher: F,
    ) -> Result<Snapshot<T>, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        if !opts.bypasses_cache() {
            if let Some(entry) = self.cache.get(key.as_str()) {
                if entry.is_fresh() {
                    trace!(resource = %key, "cache fresh, skipping fetch");
                    return Ok(entry.snapshot);
                }
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let claim = InFlight {
            generation,
            force: opts.force,
            cancel: cancel.clone(),
        };
        let joined = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(running) if running.get().force && !opts.force => {
                Some(running.get().generation)
            }
            Entry::Occupied(mut running) => {
                let prev = running.insert(claim);
                debug!(resource = %key, superseded = prev.generation, generation, "cancelling in-flight fetch");
                prev.cancel.cancel();
                None
            }
            Entry::Vacant(vacant) => {
                vacant.insert(claim);
                None
            }
        };
        if let Some(joined) = joined {
            trace!(resource = %key, joined, source = %opts.source, "joining forced fetch in flight");
            return self.follow(key, joined, opts).await;
        }
        // Clears our token if this future is dropped mid-fetch.
        let _token = TokenGuard {
            coordinator: self,
            key,
            generation,
        };

        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return self.follow(key, generation, opts).await,
            permit = slot.lock_owned() => permit,
        };

        trace!(resource = %key, generation, source = %opts.source, "fetching");
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = fetcher() => Some(result),
        };

        // Only the newest request may touch the cache.
        let result = match outcome {
            Some(result)
                if self
                    .in_flight
                    .remove_if(key, |_, f| f.generation == generation)
                    .is_some() =>
            {
                result
            }
            _ => {
                drop(permit);
                debug!(resource = %key, generation, "superseded, waiting for the newer fetch");
                return self.follow(key, generation, opts).await;
            }
        };

        match result {
            Ok(data) => {
                let snapshot = Snapshot::new(data, opts.source);
                self.cache
                    .put(key.clone(), snapshot.clone(), self.max_age(key.as_str()));
                self.settle(key, generation, Ok(snapshot.clone()));
                debug!(resource = %key, source = %opts.source, "snapshot updated");
                Ok(snapshot)
            }
            Err(err) => {
                self.settle(key, generation, Err(err.clone()));
                self.on_failure(key, opts, err)
            }
        }
    }

    /// Wait until a fetch of generation `since` or newer settles for `key`
    /// and adopt its outcome.
    async fn follow(
        &self,
        key: &ResourceKey,
        since: u64,
        opts: RefreshOptions,
    ) -> Result<Snapshot<T>, CoreError> {
        let mut rx = self
            .settled
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        let outcome = rx
            .wait_for(|latest| latest.as_ref().is_some_and(|s| s.generation >= since))
            .await
            .ok()
            .and_then(|settled| (*settled).as_ref().map(|s| s.result.clone()));

        match outcome {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(CoreError::Superseded { .. })) | None => Err(superseded(key)),
            Some(Err(err)) => self.on_failure(key, opts, err),
        }
    }

    fn settle(&self, key: &ResourceKey, generation: u64, result: Result<Snapshot<T>, CoreError>) {
        self.settled
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(Settled { generation, result }));
    }

    fn on_failure(
        &self,
        key: &ResourceKey,
        opts: RefreshOptions,
        err: CoreError,
    ) -> Result<Snapshot<T>, CoreError> {
        if opts.force || err.is_surfaced_in_background() {
            warn!(resource = %key, error = %err, force = opts.force, "fetch failed");
            return Err(err);
        }
        match self.cache.get(key.as_str()) {
            Some(entry) => {
                debug!(resource = %key, error = %err, "background fetch failed, serving last good snapshot");
                Ok(entry.snapshot)
            }
            None => {
                debug!(resource = %key, error = %err, "background fetch failed, nothing cached");
                Err(err)
            }
        }
    }
}

struct TokenGuard<'a, T> {
    coordinator: &'a FetchCoordinator<T>,
    key: &'a ResourceKey,
    generation: u64,
}

impl<T> Drop for TokenGuard<'_, T> {
    fn drop(&mut self) {
        let generation = self.generation;
        let abandoned = self
            .coordinator
            .in_flight
            .remove_if(self.key, |_, f| f.generation == generation)
            .is_some();
        if abandoned {
            // Release anyone who joined or was superseded by this request.
            self.coordinator
                .settle(self.key, generation, Err(superseded(self.key)));
        }
    }
}

fn superseded(key: &ResourceKey) -> CoreError {
    CoreError::Superseded {
        resource: key.to_string(),
    }
}

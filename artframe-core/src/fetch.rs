//! Deduplicating fetch coordinator.
//!
//! At most one fetch is active per [`AssetKey`]. The registry maps each key
//! with a fetch in flight to a `watch` channel carrying its [`LoaderState`];
//! later requests for the same key subscribe to that channel instead of
//! starting another fetch. The registry shard lock is held only around the
//! lookup/insert, never across network or decode work.
//!
//! Lock order: a cache lookup may run while a registry shard is held (to close
//! the window between a finished fetch retiring its loader and a new request
//! arriving). Nothing takes a registry shard while holding the cache lock.

use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use anyhow::Context;
use dashmap::{DashMap, mapref::entry::Entry};
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, broadcast, watch};

use crate::asset::{
    AssetKey, AssetKind, CachedAsset, decode::DecodeOptions, decode_asset,
};
use crate::cache::{AssetCache, PutOutcome};
use crate::config::CacheConfig;
use crate::constants;
use crate::error::{AssetError, Result};
use crate::source::AssetSource;
use crate::units::ByteSize;

/// Per-key fetch state.
#[derive(Debug, Clone)]
pub enum LoaderState {
    /// Never requested, or evicted with no record of a failure.
    Idle,
    /// A fetch is in flight.
    Loading,
    /// Resident in the cache, or just delivered by a finished fetch.
    Loaded(CachedAsset),
    /// The last attempt failed; remembered until re-requested or evicted.
    Failed(AssetError),
}

impl LoaderState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoaderState::Loading)
    }

    fn outcome(&self) -> Option<Result<CachedAsset>> {
        match self {
            LoaderState::Loaded(asset) => Some(Ok(asset.clone())),
            LoaderState::Failed(err) => Some(Err(err.clone())),
            LoaderState::Idle | LoaderState::Loading => None,
        }
    }
}

/// Completion notifications for view layers.
#[derive(Debug, Clone)]
pub enum AssetEvent {
    Loaded {
        key: AssetKey,
        kind: AssetKind,
        byte_size: ByteSize,
        /// False when the asset was too large for its pool and was only
        /// delivered to waiters.
        resident: bool,
    },
    Failed {
        key: AssetKey,
        error: AssetError,
    },
}

impl AssetEvent {
    pub fn key(&self) -> &AssetKey {
        match self {
            AssetEvent::Loaded { key, .. } | AssetEvent::Failed { key, .. } => {
                key
            }
        }
    }
}

/// Handle on one key's resolution.
///
/// Dropping a ticket does not cancel the fetch.
#[derive(Debug)]
pub struct LoadTicket {
    key: AssetKey,
    state: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Ready(Result<CachedAsset>),
    Pending(watch::Receiver<LoaderState>),
}

impl LoadTicket {
    fn ready(key: AssetKey, outcome: Result<CachedAsset>) -> Self {
        Self {
            key,
            state: TicketState::Ready(outcome),
        }
    }

    fn pending(key: AssetKey, rx: watch::Receiver<LoaderState>) -> Self {
        Self {
            key,
            state: TicketState::Pending(rx),
        }
    }

    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// True when the ticket was satisfied without waiting (cache hit).
    pub fn is_ready(&self) -> bool {
        matches!(self.state, TicketState::Ready(_))
    }

    /// Wait until the fetch this ticket is attached to succeeds or fails.
    pub async fn wait(self) -> Result<CachedAsset> {
        let mut rx = match self.state {
            TicketState::Ready(outcome) => return outcome,
            TicketState::Pending(rx) => rx,
        };

        loop {
            let observed = rx.borrow_and_update().outcome();
            if let Some(outcome) = observed {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped: either it published a terminal state we
                // have not observed yet, or the fetch task was torn down.
                return rx.borrow().outcome().unwrap_or(Err(AssetError::Cancelled));
            }
        }
    }
}

struct Inner {
    cache: AssetCache,
    source: Arc<dyn AssetSource>,
    loaders: DashMap<AssetKey, watch::Sender<LoaderState>>,
    failures: DashMap<AssetKey, AssetError>,
    permits: Semaphore,
    events: broadcast::Sender<AssetEvent>,
    runtime: Handle,
    decode: DecodeOptions,
    fetches: AtomicU64,
}

/// Resolves asset keys into cached assets, one fetch per key at a time.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("cache", &self.inner.cache)
            .field("in_flight", &self.inner.loaders.len())
            .field("failures", &self.inner.failures.len())
            .field("fetches", &self.inner.fetches.load(Ordering::Relaxed))
            .finish()
    }
}

impl FetchCoordinator {
    /// Build a coordinator that spawns onto the ambient tokio runtime.
    pub fn new(
        cache: AssetCache,
        source: Arc<dyn AssetSource>,
        config: &CacheConfig,
    ) -> anyhow::Result<Self> {
        let runtime = Handle::try_current()
            .context("FetchCoordinator must be created within a tokio runtime")?;
        Ok(Self::with_runtime(cache, source, config, runtime))
    }

    pub fn with_runtime(
        cache: AssetCache,
        source: Arc<dyn AssetSource>,
        config: &CacheConfig,
        runtime: Handle,
    ) -> Self {
        let (events, _) =
            broadcast::channel(constants::fetch::EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                cache,
                source,
                loaders: DashMap::new(),
                failures: DashMap::new(),
                permits: Semaphore::new(config.max_concurrent_fetches.max(1)),
                events,
                runtime,
                decode: DecodeOptions::from_config(config),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.inner.cache
    }

    /// Synchronous "what do you have right now" for the view layer.
    pub fn peek(&self, key: &AssetKey) -> Option<CachedAsset> {
        self.inner.cache.get(key)
    }

    /// Start a fetch for `key` unless it is cached or already loading.
    ///
    /// Returns a ticket that resolves with the asset. A key whose previous
    /// attempt failed is fetched afresh.
    pub fn ensure_loading(&self, key: &AssetKey) -> LoadTicket {
        if let Some(asset) = self.inner.cache.lookup(key) {
            return LoadTicket::ready(key.clone(), Ok(asset));
        }

        let rx = match self.inner.loaders.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("Fetch coordinator: attaching to in-flight load of {}", key);
                return LoadTicket::pending(key.clone(), entry.get().subscribe());
            }
            Entry::Vacant(entry) => {
                // The previous loader may have retired between the cache
                // check above and taking this shard.
                if let Some(asset) = self.inner.cache.lookup(key) {
                    return LoadTicket::ready(key.clone(), Ok(asset));
                }
                let (tx, rx) = watch::channel(LoaderState::Loading);
                entry.insert(tx);
                rx
            }
        };

        self.inner.failures.remove(key);
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        self.inner.runtime.spawn(async move {
            Inner::run(inner, task_key).await;
        });

        LoadTicket::pending(key.clone(), rx)
    }

    /// Fire-and-forget variant of [`Self::ensure_loading`].
    pub fn request_load(&self, key: &AssetKey) {
        let _ = self.ensure_loading(key);
    }

    /// `ensure_loading` and wait for the outcome.
    pub async fn resolve(&self, key: &AssetKey) -> Result<CachedAsset> {
        self.ensure_loading(key).wait().await
    }

    /// Wait on a key without starting a fetch.
    ///
    /// Fails with [`AssetError::NotFound`] when the key is neither cached,
    /// loading, nor remembered as failed.
    pub async fn wait_for(&self, key: &AssetKey) -> Result<CachedAsset> {
        if let Some(asset) = self.inner.cache.lookup(key) {
            return Ok(asset);
        }
        let rx = self.inner.loaders.get(key).map(|tx| tx.subscribe());
        if let Some(rx) = rx {
            return LoadTicket::pending(key.clone(), rx).wait().await;
        }
        if let Some(err) = self.inner.failures.get(key) {
            return Err(err.clone());
        }
        Err(AssetError::NotFound(key.clone()))
    }

    pub fn load_state(&self, key: &AssetKey) -> LoaderState {
        if let Some(tx) = self.inner.loaders.get(key) {
            return tx.borrow().clone();
        }
        if let Some(asset) = self.inner.cache.lookup(key) {
            return LoaderState::Loaded(asset);
        }
        if let Some(err) = self.inner.failures.get(key) {
            return LoaderState::Failed(err.clone());
        }
        LoaderState::Idle
    }

    pub fn is_loading(&self, key: &AssetKey) -> bool {
        self.inner.loaders.contains_key(key)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AssetEvent> {
        self.inner.events.subscribe()
    }

    /// Keys with a fetch currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.loaders.len()
    }

    /// Underlying source fetches started since construction.
    pub fn fetch_attempts(&self) -> u64 {
        self.inner.fetches.load(Ordering::Relaxed)
    }

    /// Drop `key` from the cache and forget any failure recorded for it.
    /// Returns whether a cached asset was removed.
    pub fn evict(&self, key: &AssetKey) -> bool {
        self.inner.failures.remove(key);
        self.inner.cache.remove(key)
    }

    /// Evict every cached asset and remembered failure whose key `keep`
    /// rejects. Returns the number of cached assets removed.
    pub fn evict_unless<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&AssetKey) -> bool,
    {
        self.inner.failures.retain(|key, _| keep(key));
        self.inner.cache.retain(keep)
    }

    /// Empty the cache and forget every remembered failure.
    pub fn evict_all(&self) -> usize {
        self.inner.failures.clear();
        self.inner.cache.clear()
    }
}

/// Settles the loader of a fetch task that ends without publishing a result
/// (the source panicked or the task was dropped), so waiters see
/// [`AssetError::Cancelled`] instead of hanging.
struct LoaderGuard {
    inner: Arc<Inner>,
    key: AssetKey,
    settled: bool,
}

impl LoaderGuard {
    fn settle(mut self, outcome: Result<CachedAsset>) {
        self.inner.settle(&self.key, outcome);
        self.settled = true;
    }
}

impl Drop for LoaderGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.settle(&self.key, Err(AssetError::Cancelled));
        }
    }
}

impl Inner {
    async fn run(inner: Arc<Inner>, key: AssetKey) {
        let guard = LoaderGuard {
            inner: Arc::clone(&inner),
            key: key.clone(),
            settled: false,
        };
        let outcome = inner.fetch_and_decode(&key).await;
        guard.settle(outcome);
    }

    fn settle(&self, key: &AssetKey, outcome: Result<CachedAsset>) {
        let (state, event) = match outcome {
            Ok(asset) => {
                let put = self.cache.put(key.clone(), asset.clone());
                let event = AssetEvent::Loaded {
                    key: key.clone(),
                    kind: asset.kind(),
                    byte_size: asset.byte_size(),
                    resident: matches!(put, PutOutcome::Stored { .. }),
                };
                (LoaderState::Loaded(asset), event)
            }
            Err(error) => {
                warn!("Fetch coordinator: failed to load {}: {}", key, error);
                self.failures.insert(key.clone(), error.clone());
                let event = AssetEvent::Failed {
                    key: key.clone(),
                    error: error.clone(),
                };
                (LoaderState::Failed(error), event)
            }
        };

        // Retire the loader before publishing so a waiter that wakes and
        // re-requests the key never attaches to a finished fetch.
        if let Some((_, tx)) = self.loaders.remove(key) {
            tx.send_replace(state);
        }
        let _ = self.events.send(event);
    }

    async fn fetch_and_decode(&self, key: &AssetKey) -> Result<CachedAsset> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AssetError::Cancelled)?;

        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!("Fetch coordinator: fetching {}", key);
        let bytes = self.source.fetch(key).await?;

        let options = self.decode;
        tokio::task::spawn_blocking(move || decode_asset(bytes, &options))
            .await
            .map_err(|e| AssetError::Decode(format!("decode task failed: {e}")))?
    }
}

//! Cost-bounded in-memory asset cache.
//!
//! Two pools with independent count and byte ceilings: decoded stills and
//! raw-byte animations have very different per-item footprints. Both pools
//! sit behind one lock so a key lives in at most one of them and an insert is
//! atomic with the eviction pass that makes room for it.
//!
//! Eviction is oldest-inserted first. Reads do not refresh recency.

use std::collections::HashMap;
use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::asset::{AssetKey, AssetKind, CachedAsset};
use crate::config::{CacheConfig, PoolLimits};
use crate::units::ByteSize;

/// Result of a [`AssetCache::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The asset is resident; `evicted` lists keys dropped to make room.
    Stored { evicted: Vec<AssetKey> },
    /// The asset alone exceeds its pool's byte ceiling and was not stored.
    Rejected { cost: ByteSize, max_bytes: ByteSize },
}

impl PutOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PutOutcome::Stored { .. })
    }
}

struct PoolEntry {
    asset: CachedAsset,
    cost: ByteSize,
    inserted: u64,
}

struct Pool {
    limits: PoolLimits,
    entries: HashMap<AssetKey, PoolEntry>,
    resident: ByteSize,
}

impl Pool {
    fn new(limits: PoolLimits) -> Self {
        Self {
            limits,
            entries: HashMap::with_capacity(limits.max_entries),
            resident: ByteSize::ZERO,
        }
    }

    fn remove(&mut self, key: &AssetKey) -> Option<PoolEntry> {
        let entry = self.entries.remove(key)?;
        self.resident = self.resident.saturating_sub(entry.cost);
        Some(entry)
    }

    fn fits(&self, cost: ByteSize) -> bool {
        self.entries.len() < self.limits.max_entries
            && self.resident.saturating_add(cost) <= self.limits.max_bytes
    }

    fn evict_oldest(&mut self) -> Option<AssetKey> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted)
            .map(|(key, _)| key.clone())?;
        self.remove(&oldest);
        Some(oldest)
    }

    fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.resident = ByteSize::ZERO;
        dropped
    }
}

struct Pools {
    still: Pool,
    animated: Pool,
    next_insert: u64,
}

impl Pools {
    fn pool_mut(&mut self, kind: AssetKind) -> &mut Pool {
        match kind {
            AssetKind::Static => &mut self.still,
            AssetKind::Animated => &mut self.animated,
        }
    }

    fn get(&self, key: &AssetKey) -> Option<&PoolEntry> {
        self.still
            .entries
            .get(key)
            .or_else(|| self.animated.entries.get(key))
    }

    fn remove(&mut self, key: &AssetKey) -> bool {
        let still = self.still.remove(key).is_some();
        let animated = self.animated.remove(key).is_some();
        still || animated
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rejections: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub static_entries: usize,
    pub static_bytes: ByteSize,
    pub animated_entries: usize,
    pub animated_bytes: ByteSize,
    /// [`AssetCache::get`] calls that found an entry.
    pub hits: u64,
    /// [`AssetCache::get`] calls that found nothing.
    pub misses: u64,
    /// Entries dropped to make room for a newer insert.
    pub evictions: u64,
    /// Inserts refused because the asset alone exceeds its pool ceiling.
    pub rejections: u64,
}

impl CacheStats {
    pub fn entries(&self) -> usize {
        self.static_entries + self.animated_entries
    }

    pub fn resident_bytes(&self) -> ByteSize {
        self.static_bytes.saturating_add(self.animated_bytes)
    }
}

/// Shared, cloneable handle to the bounded asset store.
#[derive(Clone)]
pub struct AssetCache {
    pools: Arc<Mutex<Pools>>,
    counters: Arc<Counters>,
}

impl fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("AssetCache")
            .field("static_entries", &stats.static_entries)
            .field("static_bytes", &stats.static_bytes)
            .field("animated_entries", &stats.animated_entries)
            .field("animated_bytes", &stats.animated_bytes)
            .field("evictions", &stats.evictions)
            .finish()
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl AssetCache {
    pub fn new(static_limits: PoolLimits, animated_limits: PoolLimits) -> Self {
        Self {
            pools: Arc::new(Mutex::new(Pools {
                still: Pool::new(static_limits),
                animated: Pool::new(animated_limits),
                next_insert: 0,
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.static_pool, config.animated_pool)
    }

    /// Non-blocking lookup. Counts towards the hit/miss statistics.
    pub fn get(&self, key: &AssetKey) -> Option<CachedAsset> {
        let found = self.lookup(key);
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Lookup that leaves the statistics alone, for internal bookkeeping.
    pub(crate) fn lookup(&self, key: &AssetKey) -> Option<CachedAsset> {
        self.pools.lock().get(key).map(|entry| entry.asset.clone())
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.pools.lock().get(key).is_some()
    }

    /// Insert or replace `key`, evicting the oldest entries of the target
    /// pool until the new entry fits under both ceilings.
    pub fn put(&self, key: AssetKey, asset: CachedAsset) -> PutOutcome {
        let cost = asset.byte_size();
        let kind = asset.kind();

        let outcome = {
            let mut pools = self.pools.lock();
            pools.remove(&key);

            let inserted = pools.next_insert;
            pools.next_insert += 1;

            let pool = pools.pool_mut(kind);
            if cost > pool.limits.max_bytes {
                PutOutcome::Rejected {
                    cost,
                    max_bytes: pool.limits.max_bytes,
                }
            } else {
                let mut evicted = Vec::new();
                while !pool.fits(cost) {
                    match pool.evict_oldest() {
                        Some(old) => evicted.push(old),
                        None => break,
                    }
                }
                pool.resident = pool.resident.saturating_add(cost);
                pool.entries.insert(
                    key.clone(),
                    PoolEntry {
                        asset,
                        cost,
                        inserted,
                    },
                );
                PutOutcome::Stored { evicted }
            }
        };

        match &outcome {
            PutOutcome::Stored { evicted } if !evicted.is_empty() => {
                self.counters
                    .evictions
                    .fetch_add(evicted.len() as u64, Ordering::Relaxed);
                debug!(
                    "Asset cache: stored {} ({}, {:?}) after evicting {} entries",
                    key,
                    cost,
                    kind,
                    evicted.len()
                );
            }
            PutOutcome::Stored { .. } => {}
            PutOutcome::Rejected { cost, max_bytes } => {
                self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Asset cache: {} ({}) exceeds the {:?} pool ceiling of {}; not cached",
                    key, cost, kind, max_bytes
                );
            }
        }

        outcome
    }

    /// Idempotent removal. Returns whether an entry was dropped.
    pub fn remove(&self, key: &AssetKey) -> bool {
        self.pools.lock().remove(key)
    }

    /// Drop every entry for which `keep` returns false.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&AssetKey) -> bool,
    {
        let mut guard = self.pools.lock();
        let pools = &mut *guard;
        let mut dropped = 0usize;
        for pool in [&mut pools.still, &mut pools.animated] {
            let doomed: Vec<AssetKey> = pool
                .entries
                .keys()
                .filter(|key| !keep(key))
                .cloned()
                .collect();
            for key in doomed {
                pool.remove(&key);
                dropped += 1;
            }
        }
        dropped
    }

    /// Drop everything (memory pressure, gallery reset).
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut pools = self.pools.lock();
            pools.still.clear() + pools.animated.clear()
        };
        if dropped > 0 {
            debug!("Asset cache: cleared {} entries", dropped);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        let pools = self.pools.lock();
        pools.still.entries.len() + pools.animated.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident keys, in no particular order.
    pub fn keys(&self) -> Vec<AssetKey> {
        let pools = self.pools.lock();
        pools
            .still
            .entries
            .keys()
            .chain(pools.animated.entries.keys())
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let pools = self.pools.lock();
        CacheStats {
            static_entries: pools.still.entries.len(),
            static_bytes: pools.still.resident,
            animated_entries: pools.animated.entries.len(),
            animated_bytes: pools.animated.resident,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
        }
    }
}

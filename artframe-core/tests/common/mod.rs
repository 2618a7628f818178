//! Shared harness for the pipeline integration tests: an in-memory asset
//! source, image fixtures and a wired-up pipeline.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use artframe_core::{
    AssetCache, AssetError, AssetKey, AssetSource, CacheConfig, CachedAsset,
    FetchCoordinator, PoolLimits, PrioritizedBatchPreloader, StaticImage,
    WindowEvictionPolicy, units::ByteSize,
};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;

pub fn key(n: usize) -> AssetKey {
    AssetKey::from(format!("https://cdn.example/gallery/{n}.png"))
}

pub fn keys(count: usize) -> Vec<AssetKey> {
    (0..count).map(key).collect()
}

pub fn png_bytes() -> Vec<u8> {
    let image = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn tiny_still() -> CachedAsset {
    CachedAsset::Static(StaticImage::new(RgbaImage::new(1, 1)))
}

/// Source serving every registered key after an optional stall.
#[derive(Default)]
pub struct StubSource {
    assets: Mutex<HashMap<AssetKey, Vec<u8>>>,
    delay: Duration,
    fetches: AtomicUsize,
    log: Mutex<Vec<AssetKey>>,
}

impl StubSource {
    pub fn serving(keys: &[AssetKey], delay: Duration) -> Self {
        let png = png_bytes();
        Self {
            assets: Mutex::new(
                keys.iter().map(|k| (k.clone(), png.clone())).collect(),
            ),
            delay,
            ..Self::default()
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetch_log(&self) -> Vec<AssetKey> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl AssetSource for StubSource {
    async fn fetch(&self, key: &AssetKey) -> artframe_core::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(key.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.assets
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| AssetError::Network(format!("HTTP 404: {key}")))
    }
}

/// Roomy pools and short timers so tests exercise policy, not ceilings.
pub fn test_config() -> CacheConfig {
    CacheConfig {
        static_pool: PoolLimits::new(32, ByteSize::from_mib(8)),
        batch_pause_ms: 5,
        debounce_ms: 40,
        ..CacheConfig::default()
    }
}

pub struct Pipeline {
    pub source: Arc<StubSource>,
    pub cache: AssetCache,
    pub coordinator: FetchCoordinator,
    pub preloader: PrioritizedBatchPreloader,
    pub window: WindowEvictionPolicy,
}

impl Pipeline {
    pub fn new(source: StubSource, config: &CacheConfig) -> Self {
        let source = Arc::new(source);
        let cache = AssetCache::from_config(config);
        let coordinator =
            FetchCoordinator::new(cache.clone(), source.clone(), config)
                .expect("inside runtime");
        let preloader =
            PrioritizedBatchPreloader::new(coordinator.clone(), config);
        let window = WindowEvictionPolicy::new(coordinator.clone(), config)
            .expect("inside runtime");
        Self {
            source,
            cache,
            coordinator,
            preloader,
            window,
        }
    }

    /// Mark every key resident without going through the source.
    pub fn warm(&self, keys: &[AssetKey]) {
        for key in keys {
            self.cache.put(key.clone(), tiny_still());
        }
    }

    pub fn resident_sorted(&self) -> Vec<AssetKey> {
        let mut resident = self.cache.keys();
        resident.sort();
        resident
    }
}

//! # Artframe Core
//!
//! Asset pipeline for the artframe slideshow viewer: a memory-bounded cache of
//! decoded artwork keyed by source URL, fed by a deduplicating fetcher and
//! managed by a prioritized preloader and a focus-window eviction policy.
//!
//! ## Overview
//!
//! - [`cache`]: two cost-bounded pools (stills and animations) with count and
//!   byte ceilings
//! - [`fetch`]: one in-flight fetch per key, GIF sniffing, decode on the
//!   blocking pool, completion events
//! - [`preload`]: priority-first batches with per-item progress
//! - [`window`]: debounced keep/load radii around the focused item, step
//!   cleanup, close and low-memory handling
//! - [`gallery`]: the gallery document that supplies ordered asset keys
//! - [`config`]: tunables loaded from TOML/JSON or the environment
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use artframe_core::{
//!     AssetCache, CacheConfig, FetchCoordinator, HttpAssetSource,
//!     PrioritizedBatchPreloader,
//! };
//!
//! async fn warm(keys: Vec<artframe_core::AssetKey>) -> anyhow::Result<()> {
//!     let config = CacheConfig::default();
//!     let source = Arc::new(HttpAssetSource::from_config(&config)?);
//!     let coordinator = FetchCoordinator::new(
//!         AssetCache::from_config(&config),
//!         source,
//!         &config,
//!     )?;
//!     let preloader = PrioritizedBatchPreloader::new(coordinator, &config);
//!     preloader
//!         .preload(&keys, [0, 1], |p| log::info!("{:.0}%", p * 100.0), || {})
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod gallery;
pub mod preload;
pub mod source;
pub mod units;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;

pub use asset::{
    AnimatedImage, AssetKey, AssetKind, CachedAsset, DecodeOptions, PlaybackSpeed,
    StaticImage,
};
pub use cache::{AssetCache, CacheStats, PutOutcome};
pub use config::{CacheConfig, CacheConfigSource, PoolLimits};
pub use error::{AssetError, Result};
pub use fetch::{AssetEvent, FetchCoordinator, LoadTicket, LoaderState};
pub use gallery::{ArtworkItem, ArtworkMetadata, Gallery};
pub use preload::{
    PreloadHandle, PreloadProgress, PreloadReport, PreloadRequest,
    PrioritizedBatchPreloader,
};
pub use source::{AssetSource, HttpAssetSource};
pub use units::ByteSize;
pub use window::{
    FocusWindow, LoadDecision, WindowEvictionPolicy, WindowRadii, WindowSync,
};

//! Asset identity and the decoded, memory-resident asset representations.

use std::{fmt, sync::Arc, time::Duration};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{AssetError, Result};
use crate::units::ByteSize;

pub mod decode;
pub mod speed;

pub use decode::{AssetKind, DecodeOptions, decode_asset};
pub use speed::PlaybackSpeed;

/// Stable identity for an asset: its source URL.
///
/// The same value keys the cache, the loader registry and window membership,
/// and is the URL handed to the fetcher.
#[derive(
    Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AssetKey(Arc<str>);

impl AssetKey {
    pub fn new(url: impl Into<Arc<str>>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the key as an absolute http(s) URL.
    pub fn to_url(&self) -> Result<url::Url> {
        let url = url::Url::parse(&self.0).map_err(|err| {
            AssetError::Network(format!("invalid url {}: {err}", self.0))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(AssetError::Network(format!(
                "unsupported scheme {other}: {}",
                self.0
            ))),
        }
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AssetKey").field(&self.as_str()).finish()
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AssetKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for AssetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single decoded still image.
#[derive(Clone)]
pub struct StaticImage {
    pub pixels: Arc<RgbaImage>,
    pub byte_size: ByteSize,
}

impl StaticImage {
    pub fn new(pixels: RgbaImage) -> Self {
        let byte_size = ByteSize::from_usize(pixels.as_raw().len());
        Self {
            pixels: Arc::new(pixels),
            byte_size,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

impl fmt::Debug for StaticImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticImage")
            .field("dimensions", &self.dimensions())
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

/// An animation kept as its raw encoded bytes plus the timing needed to
/// play it back at an arbitrary speed.
#[derive(Clone)]
pub struct AnimatedImage {
    pub data: Arc<[u8]>,
    pub frame_count: usize,
    pub total_duration: Duration,
    pub byte_size: ByteSize,
}

impl AnimatedImage {
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        frame_count: usize,
        total_duration: Duration,
    ) -> Self {
        let data = data.into();
        let byte_size = ByteSize::from_usize(data.len());
        Self {
            data,
            frame_count,
            total_duration,
            byte_size,
        }
    }

    /// Single-frame animations are displayed as stills.
    pub fn is_still(&self) -> bool {
        self.frame_count <= 1
    }

    /// Loop duration at `speed` (higher is faster). Non-positive or
    /// non-finite speeds play at normal speed.
    pub fn playback_duration(&self, speed: PlaybackSpeed) -> Duration {
        let factor = speed.factor();
        if !factor.is_finite() || factor <= 0.0 {
            return self.total_duration;
        }
        self.total_duration.div_f64(factor)
    }
}

impl fmt::Debug for AnimatedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimatedImage")
            .field("frame_count", &self.frame_count)
            .field("total_duration", &self.total_duration)
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

/// The decoded, memory-resident representation of a fetched asset.
#[derive(Debug, Clone)]
pub enum CachedAsset {
    Static(StaticImage),
    Animated(AnimatedImage),
}

impl CachedAsset {
    /// Cost charged against the cache's byte ceiling.
    pub fn byte_size(&self) -> ByteSize {
        match self {
            CachedAsset::Static(image) => image.byte_size,
            CachedAsset::Animated(animation) => animation.byte_size,
        }
    }

    pub fn kind(&self) -> AssetKind {
        match self {
            CachedAsset::Static(_) => AssetKind::Static,
            CachedAsset::Animated(_) => AssetKind::Animated,
        }
    }

    pub fn as_static(&self) -> Option<&StaticImage> {
        match self {
            CachedAsset::Static(image) => Some(image),
            CachedAsset::Animated(_) => None,
        }
    }

    pub fn as_animated(&self) -> Option<&AnimatedImage> {
        match self {
            CachedAsset::Animated(animation) => Some(animation),
            CachedAsset::Static(_) => None,
        }
    }
}

//! Fixtures shared by the unit test modules.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{
    Delay, DynamicImage, Frame, ImageFormat, Rgba, RgbaImage,
    codecs::gif::GifEncoder,
};
use parking_lot::Mutex;

use crate::asset::AssetKey;
use crate::error::{AssetError, Result};
use crate::source::AssetSource;

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([10, 120, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub(crate) fn gif_bytes(delays_ms: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        let frames = delays_ms.iter().map(|ms| {
            Frame::from_parts(
                RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])),
                0,
                0,
                Delay::from_numer_denom_ms(*ms, 1),
            )
        });
        encoder.encode_frames(frames).expect("encode gif");
    }
    out
}

pub(crate) fn key(n: usize) -> AssetKey {
    AssetKey::from(format!("https://cdn.example/art/{n}.png"))
}

/// In-memory source that counts fetches and can stall each one.
#[derive(Debug, Default)]
pub(crate) struct StubSource {
    assets: Mutex<HashMap<AssetKey, Vec<u8>>>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl StubSource {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn insert(&self, key: AssetKey, bytes: Vec<u8>) {
        self.assets.lock().insert(key, bytes);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for StubSource {
    async fn fetch(&self, key: &AssetKey) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
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

/// Source whose every fetch panics.
#[derive(Debug)]
pub(crate) struct PanickingSource;

#[async_trait]
impl AssetSource for PanickingSource {
    async fn fetch(&self, key: &AssetKey) -> Result<Vec<u8>> {
        panic!("source failed hard on {key}");
    }
}

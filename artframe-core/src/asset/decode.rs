use std::{io::Cursor, time::Duration};

use image::{
    AnimationDecoder, ImageDecoder, ImageReader, Limits, codecs::gif::GifDecoder,
};

use super::{AnimatedImage, CachedAsset, StaticImage};
use crate::config::CacheConfig;
use crate::error::{AssetError, Result};
use crate::units::ByteSize;

/// Leading bytes of every GIF stream ("GIF").
pub const GIF_SIGNATURE: [u8; 3] = [0x47, 0x49, 0x46];

/// Decoded representation chosen for a fetched byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Static,
    Animated,
}

impl AssetKind {
    /// Classify by signature only; the bytes are not validated.
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(&GIF_SIGNATURE) {
            AssetKind::Animated
        } else {
            AssetKind::Static
        }
    }
}

/// Bounds applied to every decode.
///
/// Headers are checked against `max_dimension` and `max_alloc` before any
/// pixel buffer is allocated, so a few bytes declaring a huge canvas fail
/// fast instead of exhausting memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Delay used for GIF frames that declare none.
    pub default_frame_delay: Duration,
    pub max_dimension: u32,
    pub max_alloc: ByteSize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl DecodeOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            default_frame_delay: config.default_frame_delay(),
            max_dimension: config.max_decode_dimension,
            max_alloc: config.max_decode_bytes,
        }
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc.as_bytes());
        limits
    }

    /// Reject an RGBA canvas of `width` x `height` before allocating it.
    fn check_canvas(&self, width: u32, height: u32) -> Result<()> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(AssetError::Decode(format!(
                "{width}x{height} image exceeds the {}px decode limit",
                self.max_dimension
            )));
        }
        let canvas =
            ByteSize::from_bytes(u64::from(width) * u64::from(height) * 4);
        if canvas > self.max_alloc {
            return Err(AssetError::Decode(format!(
                "{width}x{height} canvas needs {canvas}, over the {} decode limit",
                self.max_alloc
            )));
        }
        Ok(())
    }
}

/// Decode raw bytes into a cacheable asset.
///
/// CPU-bound; callers on an async runtime run this on the blocking pool.
pub fn decode_asset(data: Vec<u8>, options: &DecodeOptions) -> Result<CachedAsset> {
    match AssetKind::sniff(&data) {
        AssetKind::Animated => {
            decode_animation(data, options).map(CachedAsset::Animated)
        }
        AssetKind::Static => decode_still(&data, options).map(CachedAsset::Static),
    }
}

fn decode_still(data: &[u8], options: &DecodeOptions) -> Result<StaticImage> {
    let mut reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AssetError::Decode(e.to_string()))?;
    reader.limits(options.limits());
    let image = reader.decode()?;
    Ok(StaticImage::new(image.into_rgba8()))
}

fn decode_animation(
    data: Vec<u8>,
    options: &DecodeOptions,
) -> Result<AnimatedImage> {
    let mut decoder = GifDecoder::new(Cursor::new(data.as_slice()))?;
    let (width, height) = decoder.dimensions();
    options.check_canvas(width, height)?;
    decoder.set_limits(options.limits())?;

    // Frames are composited one at a time and dropped; only the timing is kept.
    let mut frame_count = 0usize;
    let mut total_duration = Duration::ZERO;
    for frame in decoder.into_frames() {
        let frame = frame?;
        let delay: Duration = frame.delay().into();
        total_duration += if delay.is_zero() {
            options.default_frame_delay
        } else {
            delay
        };
        frame_count += 1;
    }

    if frame_count == 0 {
        return Err(AssetError::Decode("gif contains no frames".to_string()));
    }

    Ok(AnimatedImage::new(data, frame_count, total_duration))
}

//! Tunables for the asset pipeline.
//!
//! Every field falls back to the compiled default in [`crate::constants`], so
//! a config file only needs to mention what it overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::units::ByteSize;

/// Source that produced the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Ceilings for one cache pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolLimits {
    /// Maximum number of resident entries.
    pub max_entries: usize,
    /// Maximum cumulative cost of resident entries.
    pub max_bytes: ByteSize,
}

impl PoolLimits {
    pub const fn new(max_entries: usize, max_bytes: ByteSize) -> Self {
        Self {
            max_entries,
            max_bytes,
        }
    }
}

/// Top-level asset pipeline settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Pool for decoded still images. Each entry costs its RGBA buffer.
    pub static_pool: PoolLimits,
    /// Pool for animations, which are kept as raw encoded bytes.
    pub animated_pool: PoolLimits,
    /// Keys fetched together before the preloader waits for the batch.
    pub batch_size: usize,
    /// Pause between preload batches (ms).
    pub batch_pause_ms: u64,
    /// Leading gallery items preloaded before the rest.
    pub priority_head: usize,
    /// Preload fraction at which the viewer may show the first item.
    pub display_ready_fraction: f64,
    /// Radius kept on discrete next/previous navigation.
    pub step_radius: usize,
    /// Radius kept after the debounced window sync.
    pub keep_radius: usize,
    /// Radius lazy widgets still load (with a delay) instead of dropping.
    pub load_radius: usize,
    /// Quiet interval before focus changes are applied (ms).
    pub debounce_ms: u64,
    /// Per-request HTTP timeout (ms).
    pub fetch_timeout_ms: u64,
    /// Fetches allowed in flight at once across every caller.
    pub max_concurrent_fetches: usize,
    /// Delay used for GIF frames that declare none (ms).
    pub default_frame_delay_ms: u64,
    /// Largest width or height accepted from an image header.
    pub max_decode_dimension: u32,
    /// Largest buffer a single decode may allocate.
    pub max_decode_bytes: ByteSize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            static_pool: PoolLimits::new(
                constants::cache::STATIC_MAX_ENTRIES,
                constants::cache::STATIC_MAX_BYTES,
            ),
            animated_pool: PoolLimits::new(
                constants::cache::ANIMATED_MAX_ENTRIES,
                constants::cache::ANIMATED_MAX_BYTES,
            ),
            batch_size: constants::preload::BATCH_SIZE,
            batch_pause_ms: constants::preload::BATCH_PAUSE.as_millis() as u64,
            priority_head: constants::preload::PRIORITY_HEAD,
            display_ready_fraction: constants::preload::DISPLAY_READY_FRACTION,
            step_radius: constants::window::STEP_RADIUS,
            keep_radius: constants::window::KEEP_RADIUS,
            load_radius: constants::window::LOAD_RADIUS,
            debounce_ms: constants::window::DEBOUNCE.as_millis() as u64,
            fetch_timeout_ms: constants::fetch::REQUEST_TIMEOUT.as_millis()
                as u64,
            max_concurrent_fetches: constants::fetch::MAX_CONCURRENT,
            default_frame_delay_ms: constants::fetch::DEFAULT_FRAME_DELAY
                .as_millis() as u64,
            max_decode_dimension: constants::fetch::MAX_DECODE_DIMENSION,
            max_decode_bytes: constants::fetch::MAX_DECODE_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn default_frame_delay(&self) -> Duration {
        Duration::from_millis(self.default_frame_delay_ms)
    }

    /// Largest response body worth downloading: anything bigger than both
    /// pool ceilings could never be cached.
    pub fn max_asset_bytes(&self) -> ByteSize {
        self.static_pool.max_bytes.max(self.animated_pool.max_bytes)
    }

    /// Load overrides using environment variables.
    /// Evaluation order:
    /// 1) `$ARTFRAME_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$ARTFRAME_CONFIG_JSON` (inline JSON),
    /// 3) `artframe.toml` / `config/artframe.toml` in the working directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, CacheConfigSource)> {
        if let Ok(path_str) = env::var("ARTFRAME_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, CacheConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("ARTFRAME_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .context("failed to parse ARTFRAME_CONFIG_JSON")?;
            return Ok((parsed, CacheConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, CacheConfigSource::File(path)));
        }

        Ok((Self::default(), CacheConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read artframe config from {}", path.display())
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid artframe config {}", path.display())
            })?,
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid artframe config {}: {}", path.display(), err)
            })?,
            _ => {
                Self::parse_from_str(&contents, &path.display().to_string())?
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn parse_from_str(
        contents: &str,
        origin: &str,
    ) -> anyhow::Result<Self> {
        // TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse artframe config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid artframe config json: {err}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline unable to hold or fetch
    /// anything, or that invert the radius tiers.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, pool) in
            [("static_pool", self.static_pool), ("animated_pool", self.animated_pool)]
        {
            if pool.max_entries == 0 || pool.max_bytes.is_zero() {
                bail!("{name} must allow at least one entry and one byte");
            }
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_concurrent_fetches == 0 {
            bail!("max_concurrent_fetches must be at least 1");
        }
        if self.step_radius > self.keep_radius {
            bail!(
                "step_radius ({}) must not exceed keep_radius ({})",
                self.step_radius,
                self.keep_radius
            );
        }
        if self.keep_radius > self.load_radius {
            bail!(
                "keep_radius ({}) must not exceed load_radius ({})",
                self.keep_radius,
                self.load_radius
            );
        }
        if self.max_decode_dimension == 0 || self.max_decode_bytes.is_zero() {
            bail!("max_decode_dimension and max_decode_bytes must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.display_ready_fraction) {
            bail!("display_ready_fraction must be within 0.0..=1.0");
        }
        Ok(())
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &["artframe.toml", "config/artframe.toml"];
        CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    }
}

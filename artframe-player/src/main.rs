use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use artframe_core::{
    AssetCache, AssetKey, CacheConfig, CacheConfigSource, FetchCoordinator,
    Gallery, HttpAssetSource, LoadDecision, PlaybackSpeed,
    PrioritizedBatchPreloader, WindowEvictionPolicy, gallery::normalize_gallery_id,
};
use clap::Parser;
use env_logger::{Builder, Target};
use log::{LevelFilter, debug, info, warn};

/// Preload a gallery into the artframe asset cache and walk the focus
/// window across it.
#[derive(Debug, Parser)]
#[command(name = "artframe-player", version)]
struct Args {
    /// Gallery document (JSON) supplying the ordered artwork list.
    #[arg(long, conflicts_with = "url")]
    gallery: Option<PathBuf>,

    /// Asset URL; repeat for an ad-hoc ordered list.
    #[arg(long = "url", value_name = "URL")]
    url: Vec<String>,

    /// Config file (TOML or JSON). Defaults to the environment lookup.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of items to step through after the preload (0 skips the walk).
    /// Defaults to the whole list.
    #[arg(long)]
    walk: Option<usize>,

    /// Time spent on each item while walking, in milliseconds.
    #[arg(long, default_value_t = 500)]
    dwell_ms: u64,

    /// Animation speed multiplier used when reporting loop durations.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
}

fn init_logger() {
    Builder::new()
        .target(Target::Stdout)
        .filter_level(LevelFilter::Warn)
        .filter_module("artframe_core", LevelFilter::Debug)
        .filter_module("artframe_player", LevelFilter::Debug)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CacheConfig> {
    let (config, source) = match path {
        Some(path) => (
            CacheConfig::load_from_file(path)?,
            CacheConfigSource::File(path.clone()),
        ),
        None => CacheConfig::load_from_env()?,
    };
    match source {
        CacheConfigSource::Default => info!("Using default cache config"),
        CacheConfigSource::EnvInline => {
            info!("Loaded cache config from ARTFRAME_CONFIG_JSON")
        }
        CacheConfigSource::EnvPath(path) | CacheConfigSource::File(path) => {
            info!("Loaded cache config from {}", path.display())
        }
    }
    Ok(config)
}

fn load_keys(args: &Args) -> anyhow::Result<Vec<AssetKey>> {
    if let Some(path) = &args.gallery {
        let raw = std::fs::read_to_string(path).with_context(|| {
            format!("failed to read gallery document {}", path.display())
        })?;
        let gallery = Gallery::from_json(&raw).with_context(|| {
            format!("invalid gallery document {}", path.display())
        })?;
        info!(
            "Gallery {} ({} artworks, active: {})",
            normalize_gallery_id(&gallery.human_readable_id),
            gallery.artworks().len(),
            gallery.is_active
        );
        return Ok(gallery.asset_keys());
    }
    Ok(args.url.iter().map(|url| AssetKey::from(url.as_str())).collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        init_logger();
    } else {
        env_logger::init();
    }

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    let keys = load_keys(&args)?;
    if keys.is_empty() {
        bail!("nothing to display: pass --gallery or at least one --url");
    }

    let source = Arc::new(HttpAssetSource::from_config(&config)?);
    let coordinator = FetchCoordinator::new(
        AssetCache::from_config(&config),
        source,
        &config,
    )?;
    let preloader = PrioritizedBatchPreloader::new(coordinator.clone(), &config);
    let window = WindowEvictionPolicy::new(coordinator.clone(), &config)?;

    let mut preload = preloader.spawn(preloader.gallery_request(keys.clone()));
    let ready = preload.display_ready().await;
    info!(
        "First artwork ready to show at {:.0}% ({} of {})",
        ready.fraction() * 100.0,
        ready.resolved,
        ready.total
    );

    let report = preload.join().await?;
    for (key, err) in &report.failed {
        warn!("Could not preload {}: {}", key, err);
    }
    info!(
        "Preloaded {}/{} assets in {:?}",
        report.loaded, report.total, report.elapsed
    );

    let items: Arc<[AssetKey]> = keys.into();
    let speed = PlaybackSpeed::from_factor(args.speed);
    let dwell = Duration::from_millis(args.dwell_ms);
    let steps = args.walk.unwrap_or(items.len()).min(items.len());

    for index in 0..steps {
        window.on_step(index, &items);
        let focus = window.on_focus_changed(index, Arc::clone(&items));
        let deferred = focus
            .load_range()
            .filter(|&i| focus.decision_for(i) == LoadDecision::Deferred)
            .count();

        match coordinator.peek(&items[index]) {
            Some(asset) => match asset.as_animated() {
                Some(animation) if !animation.is_still() => info!(
                    "[{}] {}: {} frames, loop {:?} at {}",
                    index,
                    items[index],
                    animation.frame_count,
                    animation.playback_duration(speed),
                    speed
                ),
                _ => info!("[{}] {}: {}", index, items[index], asset.byte_size()),
            },
            None => info!("[{}] {}: not loaded yet", index, items[index]),
        }
        debug!(
            "Window at {}: keep {:?}, {} deferred neighbours",
            index,
            focus.keep_range(),
            deferred
        );

        tokio::time::sleep(dwell).await;
    }

    let selected = steps.checked_sub(1).map(|last| &items[last]);
    window.on_close(selected);

    let stats = coordinator.cache().stats();
    info!(
        "Cache: {} stills ({}), {} animations ({}), {} hits, {} misses, {} evictions, {} rejected",
        stats.static_entries,
        stats.static_bytes,
        stats.animated_entries,
        stats.animated_bytes,
        stats.hits,
        stats.misses,
        stats.evictions,
        stats.rejections
    );
    Ok(())
}

//! Compiled defaults for every tunable in [`crate::config::CacheConfig`].

use std::time::Duration;

use crate::units::ByteSize;

pub mod cache {
    use super::ByteSize;

    /// Decoded still images are large per item; keep only a handful.
    pub const STATIC_MAX_ENTRIES: usize = 6;
    pub const STATIC_MAX_BYTES: ByteSize = ByteSize::from_mib(50);

    /// Animations are retained as raw encoded bytes.
    pub const ANIMATED_MAX_ENTRIES: usize = 3;
    pub const ANIMATED_MAX_BYTES: ByteSize = ByteSize::from_mib(30);
}

pub mod preload {
    use super::Duration;

    /// Bounds peak concurrent network + decode work on constrained hardware.
    pub const BATCH_SIZE: usize = 2;

    /// Pause between batches so memory can settle before more work is issued.
    pub const BATCH_PAUSE: Duration = Duration::from_millis(100);

    /// Number of leading gallery items preloaded ahead of the rest.
    pub const PRIORITY_HEAD: usize = 2;

    /// Progress fraction at which the first artwork can be shown.
    pub const DISPLAY_READY_FRACTION: f64 = 0.2;
}

pub mod window {
    use super::Duration;

    /// Radius kept on discrete next/previous navigation.
    pub const STEP_RADIUS: usize = 1;

    /// Radius kept resident after the debounced window sync.
    pub const KEEP_RADIUS: usize = 2;

    /// Radius still considered worth having loaded by lazy widgets.
    pub const LOAD_RADIUS: usize = 3;

    /// Quiet interval before a focus change is applied to the cache.
    pub const DEBOUNCE: Duration = Duration::from_millis(300);
}

pub mod fetch {
    use super::{ByteSize, Duration};

    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Upper bound on fetches running at once across all callers.
    pub const MAX_CONCURRENT: usize = 4;

    /// Delay assumed for GIF frames that declare none.
    pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

    /// Widest or tallest image (or GIF logical screen) the decoder accepts.
    pub const MAX_DECODE_DIMENSION: u32 = 4096;

    /// Largest single buffer a decode may allocate.
    pub const MAX_DECODE_BYTES: ByteSize = ByteSize::from_mib(64);

    /// Capacity of the asset event broadcast channel.
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

use std::fmt;

/// Animation playback speed multiplier. Higher plays faster.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub struct PlaybackSpeed(f64);

impl PlaybackSpeed {
    /// Presets offered by the speed selector, slowest first.
    pub const PRESETS: [PlaybackSpeed; 7] = [
        PlaybackSpeed(0.25),
        PlaybackSpeed(0.5),
        PlaybackSpeed(0.75),
        PlaybackSpeed(1.0),
        PlaybackSpeed(1.25),
        PlaybackSpeed(1.5),
        PlaybackSpeed(2.0),
    ];

    const NORMAL_INDEX: usize = 3;

    pub const NORMAL: PlaybackSpeed = PlaybackSpeed(1.0);

    pub const fn from_factor(factor: f64) -> Self {
        Self(factor)
    }

    pub const fn factor(self) -> f64 {
        self.0
    }

    /// Index of the matching preset, or the 1x preset when none matches.
    pub fn preset_index(self) -> usize {
        Self::PRESETS
            .iter()
            .position(|preset| (preset.0 - self.0).abs() < 0.01)
            .unwrap_or(Self::NORMAL_INDEX)
    }

    /// Next faster preset, staying at the fastest.
    pub fn faster(self) -> Self {
        let index = self.preset_index();
        Self::PRESETS[(index + 1).min(Self::PRESETS.len() - 1)]
    }

    /// Next slower preset, staying at the slowest.
    pub fn slower(self) -> Self {
        Self::PRESETS[self.preset_index().saturating_sub(1)]
    }
}

impl Default for PlaybackSpeed {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Debug for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaybackSpeed({}x)", self.0)
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

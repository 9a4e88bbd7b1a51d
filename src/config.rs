//! Playback configuration.
//!
//! All tunable behavior of the engine is carried by [`PlaybackOptions`],
//! passed explicitly into `Player::play`. Invalid numeric options never
//! fail a playback request; they fall back to the profile defaults.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hard ceiling for the crossfade duration in milliseconds.
pub const MAX_CROSSFADE_MS: u32 = 400;

/// Default crossfade duration in milliseconds.
pub const DEFAULT_CROSSFADE_MS: u32 = 80;

/// Pause inserted on the timeline for an image segment, in seconds.
pub const IMAGE_PAUSE_SECS: f64 = 2.0;

/// Voice-generation engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// High-quality neural engine ("xtts" on the wire). Slower, GPU-backed.
    Primary,
    /// Lightweight CPU engine ("piper" on the wire). Faster, lower fidelity.
    Fast,
}

impl Engine {
    /// Stable identifier, used both on the wire and in cache fingerprints.
    pub fn id(&self) -> &'static str {
        match self {
            Engine::Primary => "xtts",
            Engine::Fast => "piper",
        }
    }
}

/// Word-count ramp and character ceiling driving batch construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProfile {
    /// Word targets for the first batches, in order.
    pub ramp: Vec<usize>,
    /// Word target for every batch past the ramp.
    pub standard: usize,
    /// Upper bound on accumulated characters per batch.
    pub max_chars: usize,
}

impl BatchProfile {
    pub fn standard() -> Self {
        Self {
            ramp: vec![15, 25],
            standard: 35,
            max_chars: 600,
        }
    }

    pub fn reduced() -> Self {
        Self {
            ramp: vec![10, 15],
            standard: 20,
            max_chars: 300,
        }
    }
}

/// Lookahead window sizes for the prefetch controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferProfile {
    /// Batches requested before the timeline starts.
    pub initial: usize,
    /// Batches kept in flight once playback is underway.
    pub steady: usize,
}

impl BufferProfile {
    pub fn standard() -> Self {
        Self {
            initial: 2,
            steady: 4,
        }
    }

    pub fn reduced() -> Self {
        Self {
            initial: 1,
            steady: 2,
        }
    }
}

/// Cache capacities per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheProfile {
    /// Volatile tier entry limit.
    pub memory_entries: usize,
    /// Persistent tier entry limit.
    pub persistent_entries: usize,
}

impl CacheProfile {
    pub fn standard() -> Self {
        Self {
            memory_entries: 24,
            persistent_entries: 256,
        }
    }

    pub fn reduced() -> Self {
        Self {
            memory_entries: 8,
            persistent_entries: 64,
        }
    }
}

/// Options for one playback request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackOptions {
    /// Engine to synthesize with.
    pub engine: Engine,
    /// Path to a speaker reference (primary engine) or voice model (fast
    /// engine). `None` selects the service default voice.
    pub voice_path: Option<String>,
    /// Voice speed multiplier.
    pub speed: f32,
    /// Select the reduced batching/buffering/cache profiles.
    pub low_resource: bool,
    /// Crossfade duration in milliseconds, clamped to [`MAX_CROSSFADE_MS`].
    pub crossfade_ms: u32,
    /// Override for the initial lookahead window. Must be positive.
    pub initial_buffer: Option<usize>,
    /// Override for the steady-state lookahead window. Must be positive.
    pub steady_buffer: Option<usize>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            engine: Engine::Primary,
            voice_path: None,
            speed: 1.0,
            low_resource: false,
            crossfade_ms: DEFAULT_CROSSFADE_MS,
            initial_buffer: None,
            steady_buffer: None,
        }
    }
}

impl PlaybackOptions {
    pub fn batch_profile(&self) -> BatchProfile {
        if self.low_resource {
            BatchProfile::reduced()
        } else {
            BatchProfile::standard()
        }
    }

    pub fn cache_profile(&self) -> CacheProfile {
        if self.low_resource {
            CacheProfile::reduced()
        } else {
            CacheProfile::standard()
        }
    }

    /// Effective lookahead window, applying overrides where they are valid
    /// positive integers and the profile defaults where they are not.
    pub fn buffer_profile(&self) -> BufferProfile {
        let defaults = if self.low_resource {
            BufferProfile::reduced()
        } else {
            BufferProfile::standard()
        };

        let initial = match self.initial_buffer {
            Some(n) if n > 0 => n,
            Some(n) => {
                debug!("ignoring non-positive initial_buffer override {n}");
                defaults.initial
            }
            None => defaults.initial,
        };
        let steady = match self.steady_buffer {
            Some(n) if n > 0 => n,
            Some(n) => {
                debug!("ignoring non-positive steady_buffer override {n}");
                defaults.steady
            }
            None => defaults.steady,
        };

        BufferProfile { initial, steady }
    }

    /// Crossfade duration in seconds, clamped to the absolute maximum.
    pub fn crossfade_secs(&self) -> f64 {
        f64::from(self.crossfade_ms.min(MAX_CROSSFADE_MS)) / 1000.0
    }

    /// Speed multiplier, with non-finite or non-positive values falling
    /// back to normal speed.
    pub fn effective_speed(&self) -> f32 {
        if self.speed.is_finite() && self.speed > 0.0 {
            self.speed
        } else {
            debug!("ignoring invalid speed {}", self.speed);
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_overrides_must_be_positive() {
        let opts = PlaybackOptions {
            initial_buffer: Some(0),
            steady_buffer: Some(6),
            ..Default::default()
        };
        let buffers = opts.buffer_profile();
        assert_eq!(buffers.initial, BufferProfile::standard().initial);
        assert_eq!(buffers.steady, 6);
    }

    #[test]
    fn low_resource_selects_reduced_profiles() {
        let opts = PlaybackOptions {
            low_resource: true,
            ..Default::default()
        };
        assert_eq!(opts.batch_profile(), BatchProfile::reduced());
        assert_eq!(opts.buffer_profile(), BufferProfile::reduced());
        assert_eq!(opts.cache_profile(), CacheProfile::reduced());
    }

    #[test]
    fn crossfade_is_clamped() {
        let opts = PlaybackOptions {
            crossfade_ms: 5000,
            ..Default::default()
        };
        assert_eq!(opts.crossfade_secs(), f64::from(MAX_CROSSFADE_MS) / 1000.0);
    }

    #[test]
    fn invalid_speed_falls_back() {
        let opts = PlaybackOptions {
            speed: -2.0,
            ..Default::default()
        };
        assert_eq!(opts.effective_speed(), 1.0);

        let opts = PlaybackOptions {
            speed: 1.2,
            ..Default::default()
        };
        assert_eq!(opts.effective_speed(), 1.2);
    }
}

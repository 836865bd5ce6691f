pub mod capture;
pub mod error;
pub mod events;
pub mod filters;
pub mod frame;
pub mod interpolate;
pub mod overlay;
pub mod pipeline;
pub mod pool;
pub mod scheduler;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::frame::PixelFormat;
use crate::overlay::Bounds;

pub use crate::error::{PipelineError, Result};
pub use crate::frame::Frame;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pacing: PacingConfig,
    pub overlay: OverlayConfig,
    pub filters: FilterConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Upper bound on grabs per second; the source may deliver less.
    pub max_rate: u32,
}

/// Pacing policy knobs. The policy shape is fixed; the numbers are the
/// user's to tune per target application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Output-rate multiplier M: M-1 synthetic frames per captured pair.
    pub multiplier: u32,
    /// How many pairs may queue before the oldest is dropped whole.
    pub max_pending_pairs: usize,
    /// Grabs closer together than this are treated as re-deliveries.
    pub min_pair_interval_ms: u64,
    /// How long a pair may wait on the backend before draining real-only.
    pub interpolation_timeout_ms: u64,
    /// Presentation cadence when vsync is unavailable.
    pub tick_hz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub title: String,
    pub bounds: Bounds,
    pub vsync: bool,
    /// 1.0 is fully opaque; some compositors ignore anything else.
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Let the presentation surface scale (GPU, cheap).
    Surface,
    /// CPU Lanczos resample plus edge restore before binding.
    Lanczos,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Contrast-adaptive sharpening applied to synthetic frames; 0 disables.
    pub sharpen: f32,
    pub scale_mode: ScaleMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture-to-scheduler ring capacity.
    pub ring_capacity: usize,
    /// Maximum pixel buffers in flight across the whole pipeline.
    pub pool_capacity: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            pacing: PacingConfig::default(),
            overlay: OverlayConfig::default(),
            filters: FilterConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: PixelFormat::Rgba8,
            max_rate: 60,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            multiplier: 2,
            max_pending_pairs: 2,
            min_pair_interval_ms: 2,
            interpolation_timeout_ms: 200,
            tick_hz: 60,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            title: "Aurora Overlay".into(),
            bounds: Bounds {
                x: 0,
                y: 0,
                width: 1280,
                height: 720,
            },
            vsync: true,
            opacity: 1.0,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sharpen: 0.3,
            scale_mode: ScaleMode::Surface,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 8,
            pool_capacity: 32,
            shutdown_timeout_ms: 500,
        }
    }
}

impl Config {
    /// Layer `aurora.toml` (working directory) and `AURORA_*` environment
    /// variables over the defaults.
    pub fn load() -> Result<Self> {
        let loaded = config::Config::builder()
            .add_source(config::File::with_name("aurora").required(false))
            .add_source(config::Environment::with_prefix("AURORA").separator("__"))
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let mut cfg: Config = loaded
            .try_deserialize()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.pacing.multiplier < 2 {
            return Err(PipelineError::Config(
                "pacing.multiplier must be at least 2".into(),
            ));
        }
        if self.pacing.max_pending_pairs == 0 {
            return Err(PipelineError::Config(
                "pacing.max_pending_pairs must be at least 1".into(),
            ));
        }
        if self.pipeline.pool_capacity < self.pacing.multiplier as usize * 2 {
            return Err(PipelineError::Config(
                "pipeline.pool_capacity too small for the configured multiplier".into(),
            ));
        }
        self.filters.sharpen = self.filters.sharpen.clamp(0.0, 1.0);
        Ok(())
    }
}

/// Performance counters sampled at shutdown and on the stats log line
#[derive(Debug, Default)]
pub struct Metrics {
    pub capture_fps: f64,
    pub present_fps: f64,
    pub frames_presented: u64,
    pub frames_repeated: u64,
    pub pairs_dropped: u64,
    pub avg_present_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().expect("defaults must validate");
    }

    #[test]
    fn multiplier_below_two_is_rejected() {
        let mut cfg = Config::default();
        cfg.pacing.multiplier = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sharpen_is_clamped_into_range() {
        let mut cfg = Config::default();
        cfg.filters.sharpen = 4.0;
        cfg.validate().expect("validate");
        assert_eq!(cfg.filters.sharpen, 1.0);
    }
}

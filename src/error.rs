//! Error taxonomy for the capture-interpolate-present pipeline.
//!
//! Recoverable variants are absorbed by the orchestrator and converted into
//! scheduling decisions plus a diagnostic event; only `InvalidState` and
//! construction failures terminate the run loop.

use crate::frame::PixelFormat;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Pool capacity reached. Backpressure signal, not fatal: callers drop
    /// their oldest pending work and retry.
    #[error("frame buffer pool exhausted ({in_flight}/{capacity} buffers in flight)")]
    PoolExhausted { in_flight: usize, capacity: usize },

    /// An interpolation request outlived its deadline. Treated as "not
    /// ready" by the scheduler and fed to the duplicate-frame policy.
    #[error("interpolation request for pair {pair} timed out")]
    InterpolationTimeout { pair: u64 },

    /// The backend could not produce synthetic frames for a pair. The pair
    /// falls back to presenting only its real frames.
    #[error("interpolation failed for pair {pair}: {reason}")]
    InterpolationFailure { pair: u64, reason: String },

    /// The capture source produced nothing or went away. Presentation holds
    /// the last frame and resumes when capture returns.
    #[error("capture source unavailable: {0}")]
    CaptureUnavailable(String),

    /// A scheduling contract violation (e.g. bind without present). Fatal.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The presentation surface was lost (display mode change, device
    /// reset). The orchestrator rebuilds the surface.
    #[error("presentation surface lost: {0}")]
    SurfaceLost(String),

    #[error("surface construction failed: {0}")]
    SurfaceInit(String),

    #[error("unsupported pixel format {0:?} for {1}")]
    UnsupportedFormat(PixelFormat, &'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Recoverable errors become scheduling decisions; the rest propagate.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidState(_) | Self::SurfaceInit(_) | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification_matches_propagation_policy() {
        assert!(PipelineError::PoolExhausted {
            in_flight: 4,
            capacity: 4
        }
        .is_recoverable());
        assert!(PipelineError::InterpolationTimeout { pair: 1 }.is_recoverable());
        assert!(PipelineError::CaptureUnavailable("gone".into()).is_recoverable());
        assert!(PipelineError::SurfaceLost("mode change".into()).is_recoverable());
        assert!(!PipelineError::InvalidState("bind before present").is_recoverable());
        assert!(!PipelineError::SurfaceInit("no display".into()).is_recoverable());
    }
}

//! Frame types shared across the pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::pool::PooledBuffer;

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgb24 => 3,
        }
    }
}

/// Where a frame came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameKind {
    /// Obtained directly from the capture source.
    Real,
    /// Produced by the interpolation backend between two real frames.
    Synthetic {
        /// Sequence number of the bounding frame pair.
        pair: u64,
        /// Temporal position within the pair, in (0, 1).
        fraction: f32,
    },
}

impl FrameKind {
    pub fn is_real(self) -> bool {
        matches!(self, Self::Real)
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub kind: FrameKind,
}

/// Immutable frame with zero-copy semantics: cloning shares the pooled
/// buffer, and the buffer returns to the pool when the last clone drops.
#[derive(Clone)]
pub struct Frame {
    /// Pixel data, owned by the frame buffer pool.
    pub data: PooledBuffer,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture/generation timestamp for pairing and latency tracking
    pub timestamp: Instant,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn kind(&self) -> FrameKind {
        self.meta.kind
    }

    /// Dump the frame as PNG for diagnostics.
    pub fn write_png(&self, path: &Path) -> Result<()> {
        let color = match self.meta.format {
            PixelFormat::Rgba8 => image::ExtendedColorType::Rgba8,
            PixelFormat::Rgb24 => image::ExtendedColorType::Rgb8,
            other => return Err(PipelineError::UnsupportedFormat(other, "png dump")),
        };
        image::save_buffer(path, &self.data, self.meta.width, self.meta.height, color)
            .map_err(|e| PipelineError::Config(format!("png dump failed: {e}")))
    }
}


impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("kind", &self.meta.kind)
            .field("size", &(self.meta.width, self.meta.height))
            .finish()
    }
}

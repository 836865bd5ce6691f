//! Presentation surface boundary.
//!
//! The overlay shows exactly one frame at a time. `bind` hands a frame to
//! the surface, `present` pushes it to the display aligned to vertical
//! refresh; the pair must alternate per tick, enforced by
//! [`PresentationSlot`] independently of any concrete window system.

pub mod sdl;

pub use sdl::Sdl2Overlay;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::frame::Frame;

/// Overlay window placement, tracking the target application's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Out-of-band surface feedback gathered while pumping window events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceControl {
    Continue,
    /// The window system asked us to close.
    Close,
}

/// A zero-input overlay the scheduler presents into.
pub trait PresentationSurface {
    /// Stage a frame. Calling this twice without an intervening `present`
    /// is a contract violation (`InvalidState`).
    fn bind(&mut self, frame: &Frame) -> Result<()>;

    /// Push the bound frame to the display. `SurfaceLost` is recoverable
    /// via [`PresentationSurface::rebuild`].
    fn present(&mut self) -> Result<()>;

    /// Track the target window's new bounds; backing buffers are
    /// reallocated as needed.
    fn resize(&mut self, bounds: Bounds) -> Result<()>;

    /// Recreate display resources after `SurfaceLost`.
    fn rebuild(&mut self) -> Result<()>;

    /// Pump window events; cheap, called once per tick.
    fn poll_control(&mut self) -> SurfaceControl {
        SurfaceControl::Continue
    }
}

/// Bind/present alternation guard: at most one frame is owned by the
/// display at a time, and ownership must round-trip every tick.
#[derive(Debug, Default)]
pub struct PresentationSlot {
    bound: Option<u64>,
}

impl PresentationSlot {
    pub fn bind(&mut self, frame_sequence: u64) -> Result<()> {
        if self.bound.is_some() {
            return Err(PipelineError::InvalidState(
                "bind called while a frame is already bound",
            ));
        }
        self.bound = Some(frame_sequence);
        Ok(())
    }

    /// Take the bound frame for presentation.
    pub fn take(&mut self) -> Result<u64> {
        self.bound.take().ok_or(PipelineError::InvalidState(
            "present called with no frame bound",
        ))
    }

    /// Drop whatever is bound (surface rebuild, shutdown).
    pub fn clear(&mut self) {
        self.bound = None;
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_present_alternation_round_trips() {
        let mut slot = PresentationSlot::default();
        slot.bind(1).expect("first bind");
        assert_eq!(slot.take().expect("take"), 1);
        slot.bind(2).expect("bind after present");
        assert_eq!(slot.take().expect("take"), 2);
    }

    #[test]
    fn double_bind_is_invalid_state() {
        let mut slot = PresentationSlot::default();
        slot.bind(1).expect("first bind");
        let err = slot.bind(2).expect_err("double bind must fail");
        assert!(matches!(err, PipelineError::InvalidState(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn present_without_bind_is_invalid_state() {
        let mut slot = PresentationSlot::default();
        let err = slot.take().expect_err("nothing bound");
        assert!(matches!(err, PipelineError::InvalidState(_)));
    }

    #[test]
    fn clear_releases_ownership() {
        let mut slot = PresentationSlot::default();
        slot.bind(7).expect("bind");
        slot.clear();
        assert!(!slot.is_bound());
        slot.bind(8).expect("bind after clear");
    }
}

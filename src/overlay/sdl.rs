//! SDL2 overlay surface.
//!
//! A borderless, always-on-top, non-input-grabbing window covering the
//! target application's bounds. Present is vsync-aligned when the driver
//! supports it. Streaming textures are created per present; at overlay
//! resolutions the upload dominates either way and it keeps texture
//! lifetimes trivial across rebuilds.

use sdl2::event::{Event, WindowEvent};
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::frame::{Frame, PixelFormat};
use crate::overlay::{Bounds, PresentationSlot, PresentationSurface, SurfaceControl};
use crate::OverlayConfig;

pub struct Sdl2Overlay {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: sdl2::EventPump,
    slot: PresentationSlot,
    staged: Option<Frame>,
    bounds: Bounds,
}

impl Sdl2Overlay {
    pub fn new(sdl_context: &sdl2::Sdl, config: &OverlayConfig) -> Result<Self> {
        let video = sdl_context
            .video()
            .map_err(PipelineError::SurfaceInit)?;

        let bounds = config.bounds;
        let window = video
            .window(&config.title, bounds.width, bounds.height)
            .position(bounds.x, bounds.y)
            .borderless()
            .always_on_top()
            .build()
            .map_err(|e| PipelineError::SurfaceInit(e.to_string()))?;

        if config.opacity < 1.0 {
            if let Err(e) = window.set_opacity(config.opacity) {
                // Not every compositor supports it; the overlay still works.
                warn!(error = %e, "window opacity unsupported");
            }
        }

        let mut canvas_builder = window.into_canvas();
        if config.vsync {
            canvas_builder = canvas_builder.present_vsync();
        }
        let canvas = canvas_builder
            .build()
            .map_err(|e| PipelineError::SurfaceInit(e.to_string()))?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context
            .event_pump()
            .map_err(PipelineError::SurfaceInit)?;

        info!(
            x = bounds.x,
            y = bounds.y,
            width = bounds.width,
            height = bounds.height,
            vsync = config.vsync,
            "overlay surface created"
        );

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            slot: PresentationSlot::default(),
            staged: None,
            bounds,
        })
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn texture_format(format: PixelFormat) -> PixelFormatEnum {
        match format {
            PixelFormat::Rgba8 => PixelFormatEnum::RGBA32,
            PixelFormat::Bgra8 => PixelFormatEnum::BGRA32,
            PixelFormat::Rgb24 => PixelFormatEnum::RGB24,
        }
    }
}

impl PresentationSurface for Sdl2Overlay {
    fn bind(&mut self, frame: &Frame) -> Result<()> {
        self.slot.bind(frame.meta.sequence)?;
        self.staged = Some(frame.clone());
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.slot.take()?;
        let frame = self
            .staged
            .take()
            .ok_or(PipelineError::InvalidState("present with no staged frame"))?;

        let render_start = Instant::now();
        let mut texture = self
            .texture_creator
            .create_texture_streaming(
                Self::texture_format(frame.meta.format),
                frame.meta.width,
                frame.meta.height,
            )
            .map_err(|e| PipelineError::SurfaceLost(e.to_string()))?;

        let pitch = frame.meta.width as usize * frame.meta.format.bytes_per_pixel();
        texture
            .update(None, &frame.data, pitch)
            .map_err(|e| PipelineError::SurfaceLost(e.to_string()))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(PipelineError::SurfaceLost)?;
        self.canvas.present();

        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        Ok(())
    }

    fn resize(&mut self, bounds: Bounds) -> Result<()> {
        debug!(?bounds, "overlay tracking target window");
        let window = self.canvas.window_mut();
        window.set_position(
            sdl2::video::WindowPos::Positioned(bounds.x),
            sdl2::video::WindowPos::Positioned(bounds.y),
        );
        window
            .set_size(bounds.width, bounds.height)
            .map_err(|e| PipelineError::SurfaceLost(e.to_string()))?;
        self.bounds = bounds;
        // Anything staged was sized for the old bounds.
        self.slot.clear();
        self.staged = None;
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        warn!("rebuilding overlay surface");
        self.slot.clear();
        self.staged = None;
        self.texture_creator = self.canvas.texture_creator();
        Ok(())
    }

    fn poll_control(&mut self) -> SurfaceControl {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::Window {
                    win_event: WindowEvent::Close,
                    ..
                } => {
                    info!("overlay close requested");
                    return SurfaceControl::Close;
                }
                _ => {}
            }
        }
        SurfaceControl::Continue
    }
}

//! Pipeline orchestrator.
//!
//! Wires capture, interpolation, scheduling, and presentation into a run
//! loop with two lifecycle transitions: startup (adapters connected,
//! surface handed in) and shutdown (capture stopped, outstanding
//! interpolation canceled and drained with a timeout, buffers released).
//!
//! Concurrency layout: the capture source polls on its own tokio task and
//! hands frames over through a drop-oldest ring; the scheduler lives
//! exclusively on the run-loop thread, so every `on_*` entry funnels
//! through one serialization point; adapter calls (capture, backend,
//! present) happen strictly outside any scheduler access.

pub mod ring;

pub use ring::FrameRing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureSource;
use crate::error::{PipelineError, Result};
use crate::events::{self, emit, EventReceiver, EventSender, PipelineEvent};
use crate::frame::{Frame, PixelFormat};
use crate::interpolate::{InterpolationBackend, RequestHandle};
use crate::overlay::{Bounds, PresentationSurface, SurfaceControl};
use crate::pool::FrameBufferPool;
use crate::scheduler::{BackendCommand, PacingScheduler, TickAction};
use crate::{filters, Config, ScaleMode};

/// Requests the run loop to stop and drain.
#[derive(Clone)]
pub struct PipelineHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl PipelineHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct Pipeline<C, I, S> {
    config: Config,
    pool: FrameBufferPool,
    capture: C,
    backend: I,
    surface: S,
    scheduler: PacingScheduler,
    ring: Arc<FrameRing>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    bounds_rx: Option<flume::Receiver<Bounds>>,
    shutdown: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C, I, S> Pipeline<C, I, S>
where
    C: CaptureSource + 'static,
    I: InterpolationBackend,
    S: PresentationSurface,
{
    pub fn new(
        config: Config,
        pool: FrameBufferPool,
        capture: C,
        backend: I,
        surface: S,
    ) -> (Self, PipelineHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);
        let (events_tx, events_rx) = events::channel();
        let scheduler = PacingScheduler::new(config.pacing.clone(), events_tx.clone());
        let ring = Arc::new(FrameRing::new(config.pipeline.ring_capacity));

        let pipeline = Self {
            config,
            pool,
            capture,
            backend,
            surface,
            scheduler,
            ring,
            events_tx,
            events_rx,
            bounds_rx: None,
            shutdown: Arc::clone(&shutdown),
            shutdown_rx,
        };
        (pipeline, PipelineHandle { shutdown })
    }

    /// Diagnostic event stream; every drop/duplicate/fallback decision
    /// shows up here.
    pub fn events(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    /// Feed target-window bounds changes into `resize`.
    pub fn track_bounds(&mut self, rx: flume::Receiver<Bounds>) {
        self.bounds_rx = Some(rx);
    }

    /// Run until stopped (handle, close request, or fatal error).
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            pool,
            mut capture,
            mut backend,
            mut surface,
            mut scheduler,
            ring,
            events_tx,
            events_rx: _events_rx,
            bounds_rx,
            shutdown,
            shutdown_rx,
        } = self;

        capture.start()?;
        let capture_task = spawn_capture_task(
            capture,
            Arc::clone(&ring),
            events_tx.clone(),
            shutdown_rx.clone(),
            config.capture.max_rate,
        );
        info!("pipeline started");

        let tick_interval = Duration::from_secs_f64(1.0 / config.pacing.tick_hz.max(1) as f64);
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut outstanding: HashMap<u64, RequestHandle> = HashMap::new();
        let mut presented: u64 = 0;
        let mut fps_window_start = Instant::now();
        let mut result = Ok(());

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            ticker.tick().await;

            if surface.poll_control() == SurfaceControl::Close {
                let _ = shutdown.send(true);
                break;
            }

            if let Some(rx) = &bounds_rx {
                for bounds in rx.try_iter() {
                    if let Err(e) = surface.resize(bounds) {
                        warn!(error = %e, "resize failed; rebuilding surface");
                        if let Err(fatal) = surface.rebuild() {
                            result = Err(fatal);
                            break;
                        }
                        emit(&events_tx, PipelineEvent::SurfaceRebuilt);
                    }
                }
                if result.is_err() {
                    break;
                }
            }

            // Captured frames first, so this tick sees the newest pairs.
            while let Some(frame) = ring.pop() {
                let commands = scheduler.on_captured(frame);
                execute_commands(&mut backend, &mut scheduler, &mut outstanding, commands);
            }

            poll_outstanding(&mut backend, Some(&mut scheduler), &mut outstanding);

            let outcome = scheduler.on_tick(Instant::now());
            execute_commands(
                &mut backend,
                &mut scheduler,
                &mut outstanding,
                outcome.commands,
            );

            let frame = match outcome.action {
                TickAction::Present(frame) | TickAction::Repeat(frame) => frame,
                TickAction::Idle => continue,
            };

            let frame = prepare_for_display(&pool, &config, frame);
            match show(&mut surface, &frame) {
                Ok(()) => {
                    presented += 1;
                    metrics::histogram!("present_latency_ms")
                        .record(frame.timestamp.elapsed().as_secs_f64() * 1e3);
                    if presented % 300 == 0 {
                        let fps = 300.0 / fps_window_start.elapsed().as_secs_f64();
                        debug!(fps, pending = scheduler.pending_pairs(), "pacing");
                        fps_window_start = Instant::now();
                    }
                }
                Err(e @ PipelineError::SurfaceLost(_)) => {
                    warn!(error = %e, "presentation surface lost");
                    match surface.rebuild() {
                        Ok(()) => emit(&events_tx, PipelineEvent::SurfaceRebuilt),
                        Err(fatal) => {
                            result = Err(fatal);
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "presentation failed");
                    result = Err(e);
                    break;
                }
            }
        }

        // Shutdown: stop capture, cancel and drain interpolation, then let
        // buffers and the surface drop.
        info!("pipeline stopping");
        let _ = shutdown.send(true);
        let drain = Duration::from_millis(config.pipeline.shutdown_timeout_ms);
        if tokio::time::timeout(drain, capture_task).await.is_err() {
            warn!("capture task did not stop within the drain timeout");
        }

        for handle in outstanding.values() {
            backend.cancel(*handle);
        }
        let deadline = Instant::now() + drain;
        while !outstanding.is_empty() && Instant::now() < deadline {
            poll_outstanding(&mut backend, None, &mut outstanding);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        if !outstanding.is_empty() {
            warn!(remaining = outstanding.len(), "interpolation drain timed out");
        }

        let (acquired, released, reused, exhausted) = pool.stats();
        let (written, read, dropped) = ring.stats();
        info!(
            presented,
            buffers_acquired = acquired,
            buffers_released = released,
            buffers_reused = reused,
            pool_exhausted = exhausted,
            ring_written = written,
            ring_read = read,
            ring_dropped = dropped,
            "pipeline stopped"
        );
        result
    }
}

fn spawn_capture_task<C: CaptureSource + 'static>(
    mut capture: C,
    ring: Arc<FrameRing>,
    events_tx: EventSender,
    mut shutdown_rx: watch::Receiver<bool>,
    max_rate: u32,
) -> tokio::task::JoinHandle<()> {
    // Poll at twice the capture cap; the source itself rate-limits.
    let poll_interval = Duration::from_secs_f64(1.0 / (max_rate.max(1) as f64 * 2.0));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match capture.poll() {
                        Ok(Some(frame)) => ring.push(frame),
                        Ok(None) => {}
                        Err(e) if e.is_recoverable() => {
                            debug!(error = %e, "capture stalled");
                            emit(
                                &events_tx,
                                PipelineEvent::CaptureStalled {
                                    reason: e.to_string(),
                                },
                            );
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Err(e) => {
                            error!(error = %e, "capture failed");
                            break;
                        }
                    }
                }
            }
        }
        capture.stop();
        debug!("capture task exited");
    })
}

fn execute_commands<I: InterpolationBackend>(
    backend: &mut I,
    scheduler: &mut PacingScheduler,
    outstanding: &mut HashMap<u64, RequestHandle>,
    commands: Vec<BackendCommand>,
) {
    for command in commands {
        match command {
            BackendCommand::Submit(job) => {
                let pair = job.pair;
                match backend.submit(job) {
                    Ok(handle) => {
                        outstanding.insert(pair, handle);
                    }
                    Err(e) => scheduler.on_interpolation_failed(pair, &e.to_string()),
                }
            }
            BackendCommand::Cancel { pair } => {
                // Keep the entry: the canceled request still reports back
                // with whatever frames it produced.
                if let Some(handle) = outstanding.get(&pair) {
                    backend.cancel(*handle);
                }
            }
        }
    }
}

fn poll_outstanding<I: InterpolationBackend>(
    backend: &mut I,
    mut scheduler: Option<&mut PacingScheduler>,
    outstanding: &mut HashMap<u64, RequestHandle>,
) {
    use crate::interpolate::RequestStatus;

    let pairs: Vec<u64> = outstanding.keys().copied().collect();
    for pair in pairs {
        let Some(&handle) = outstanding.get(&pair) else {
            continue;
        };
        match backend.poll(handle) {
            RequestStatus::Pending => {}
            RequestStatus::Complete(frames) | RequestStatus::Canceled(frames) => {
                outstanding.remove(&pair);
                // With no scheduler (shutdown drain) dropping the frames
                // releases their buffers, which is all consuming means here.
                if let Some(scheduler) = scheduler.as_deref_mut() {
                    scheduler.on_interpolated(pair, frames);
                }
            }
            RequestStatus::Failed(reason) => {
                outstanding.remove(&pair);
                if let Some(scheduler) = scheduler.as_deref_mut() {
                    scheduler.on_interpolation_failed(pair, &reason);
                }
            }
        }
    }
}

/// Quality scaling path: resample to the overlay bounds on the CPU when
/// configured, falling back to the surface's own scaling under pool
/// pressure or for non-RGBA frames.
fn prepare_for_display(pool: &FrameBufferPool, config: &Config, frame: Frame) -> Frame {
    if config.filters.scale_mode != ScaleMode::Lanczos {
        return frame;
    }
    let target = (config.overlay.bounds.width, config.overlay.bounds.height);
    if target == (frame.meta.width, frame.meta.height) || frame.meta.format != PixelFormat::Rgba8
    {
        return frame;
    }

    let scaled = match filters::upscale_lanczos(&frame.data, frame.meta.width, frame.meta.height, target)
    {
        Ok(scaled) => scaled,
        Err(e) => {
            debug!(error = %e, "quality scaling skipped");
            return frame;
        }
    };
    let mut lease = match pool.acquire(frame.meta.format, target.0, target.1) {
        Ok(lease) => lease,
        Err(_) => return frame,
    };
    lease.fill_from(&scaled);

    let mut meta = (*frame.meta).clone();
    meta.width = target.0;
    meta.height = target.1;
    meta.stride = target.0;
    Frame {
        data: lease.freeze(),
        meta: Arc::new(meta),
        timestamp: frame.timestamp,
    }
}

/// One serialized bind/present pair.
fn show<S: PresentationSurface>(surface: &mut S, frame: &Frame) -> Result<()> {
    surface.bind(frame)?;
    surface.present()
}

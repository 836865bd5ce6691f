//! Aurora: frame-generation overlay pipeline.
//!
//! Captures a source, pairs consecutive frames, asks the interpolation
//! backend for in-betweens, and paces real + synthetic frames onto an
//! always-on-top overlay. This binary wires the built-in adapters (test
//! pattern source, blend backend, SDL2 overlay); real capture/inference
//! adapters plug into the same traits.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use aurora::capture::TestPatternSource;
use aurora::interpolate::BlendInterpolator;
use aurora::overlay::Sdl2Overlay;
use aurora::pipeline::Pipeline;
use aurora::pool::FrameBufferPool;
use aurora::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aurora=debug".to_string()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Aurora launching...");

    let config = Config::load().map_err(|e| eyre!(e))?;
    aurora::CONFIG.store(Arc::new(config.clone()));

    let pool = FrameBufferPool::new(config.pipeline.pool_capacity);
    let capture = TestPatternSource::new(config.capture.clone(), pool.clone());
    let backend = BlendInterpolator::new(pool.clone(), config.filters.clone());

    // SDL wants the main thread; the pipeline run loop stays here too.
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let surface = Sdl2Overlay::new(&sdl_context, &config.overlay).map_err(|e| eyre!(e))?;

    let (pipeline, handle) = Pipeline::new(config, pool, capture, backend, surface);

    // Surface pacing decisions in the log.
    let events = pipeline.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match &event {
                aurora::events::PipelineEvent::MissedInterpolation { .. } => {
                    debug!(?event, "pacing")
                }
                _ => warn!(?event, "pipeline event"),
            }
        }
    });

    // Graceful drain on ctrl-c.
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping");
            ctrl_c_handle.stop();
        }
    });

    pipeline.run().await.map_err(|e| eyre!(e))?;

    info!("Aurora shutting down");
    Ok(())
}

//! CPU weighted-blend interpolation backend.
//!
//! The always-available fallback tier: no GPU, no model files, bounded
//! memory via the shared frame pool. Quality is what a linear crossfade
//! gives you; the value here is a backend with real asynchronous latency so
//! the scheduler's pacing policy is exercised end to end. Runs on a
//! dedicated worker thread fed over channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::filters;
use crate::frame::{Frame, FrameKind, FrameMetadata, PixelFormat};
use crate::interpolate::{InterpolationBackend, InterpolationJob, RequestHandle, RequestStatus};
use crate::pool::FrameBufferPool;
use crate::FilterConfig;

struct WorkerJob {
    handle: RequestHandle,
    job: InterpolationJob,
    cancel: Arc<AtomicBool>,
}

pub struct BlendInterpolator {
    next_handle: u64,
    jobs_tx: flume::Sender<WorkerJob>,
    results_rx: flume::Receiver<(RequestHandle, RequestStatus)>,
    ready: HashMap<RequestHandle, RequestStatus>,
    outstanding: HashMap<RequestHandle, Arc<AtomicBool>>,
    worker: Option<JoinHandle<()>>,
}

impl BlendInterpolator {
    pub fn new(pool: FrameBufferPool, filters: FilterConfig) -> Self {
        let (jobs_tx, jobs_rx) = flume::bounded::<WorkerJob>(8);
        let (results_tx, results_rx) = flume::unbounded();

        let worker = std::thread::Builder::new()
            .name("blend-interp".into())
            .spawn(move || worker_loop(jobs_rx, results_tx, pool, filters))
            .expect("spawn interpolation worker");

        info!("blend interpolation backend started");
        Self {
            next_handle: 0,
            jobs_tx,
            results_rx,
            ready: HashMap::new(),
            outstanding: HashMap::new(),
            worker: Some(worker),
        }
    }

    fn drain_results(&mut self) {
        for (handle, status) in self.results_rx.try_iter() {
            self.ready.insert(handle, status);
        }
    }
}

impl InterpolationBackend for BlendInterpolator {
    fn submit(&mut self, job: InterpolationJob) -> Result<RequestHandle> {
        self.next_handle += 1;
        let handle = RequestHandle(self.next_handle);
        let pair = job.pair;
        let cancel = Arc::new(AtomicBool::new(false));
        self.outstanding.insert(handle, Arc::clone(&cancel));

        self.jobs_tx
            .send(WorkerJob {
                handle,
                job,
                cancel,
            })
            .map_err(|_| PipelineError::InterpolationFailure {
                pair,
                reason: "interpolation worker is gone".into(),
            })?;
        Ok(handle)
    }

    fn poll(&mut self, handle: RequestHandle) -> RequestStatus {
        self.drain_results();
        match self.ready.remove(&handle) {
            Some(status) => {
                self.outstanding.remove(&handle);
                status
            }
            None if self.outstanding.contains_key(&handle) => RequestStatus::Pending,
            None => RequestStatus::Failed("unknown request handle".into()),
        }
    }

    fn cancel(&mut self, handle: RequestHandle) {
        if let Some(flag) = self.outstanding.get(&handle) {
            debug!(handle = handle.0, "cancel requested");
            flag.store(true, Ordering::Release);
        }
    }
}

impl Drop for BlendInterpolator {
    fn drop(&mut self) {
        for flag in self.outstanding.values() {
            flag.store(true, Ordering::Release);
        }
        // Disconnect the job channel so the worker's recv loop ends.
        let (dead_tx, _) = flume::bounded(0);
        drop(std::mem::replace(&mut self.jobs_tx, dead_tx));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    jobs_rx: flume::Receiver<WorkerJob>,
    results_tx: flume::Sender<(RequestHandle, RequestStatus)>,
    pool: FrameBufferPool,
    filters: FilterConfig,
) {
    while let Ok(WorkerJob {
        handle,
        job,
        cancel,
    }) = jobs_rx.recv()
    {
        let started = Instant::now();
        let status = run_job(&pool, &filters, &job, &cancel);
        metrics::histogram!("interpolation_time_us")
            .record(started.elapsed().as_micros() as f64);
        if results_tx.send((handle, status)).is_err() {
            break;
        }
    }
    debug!("interpolation worker exiting");
}

fn run_job(
    pool: &FrameBufferPool,
    filters: &FilterConfig,
    job: &InterpolationJob,
    cancel: &AtomicBool,
) -> RequestStatus {
    let a = &job.first;
    let b = &job.second;
    if a.meta.width != b.meta.width
        || a.meta.height != b.meta.height
        || a.meta.format != b.meta.format
    {
        return RequestStatus::Failed(format!(
            "pair {} frames disagree on geometry ({}x{} vs {}x{})",
            job.pair,
            a.meta.width,
            a.meta.height,
            b.meta.width,
            b.meta.height
        ));
    }

    let mut produced = Vec::with_capacity(job.fractions.len());
    for &t in &job.fractions {
        if cancel.load(Ordering::Acquire) {
            debug!(pair = job.pair, done = produced.len(), "job canceled mid-run");
            return RequestStatus::Canceled(produced);
        }
        match blend_frame(pool, a, b, t, job.pair, filters) {
            Ok(frame) => produced.push(frame),
            Err(e) => {
                warn!(pair = job.pair, error = %e, "blend failed");
                return RequestStatus::Failed(e.to_string());
            }
        }
    }
    RequestStatus::Complete(produced)
}

/// Linear crossfade at fraction `t`, fixed-point per channel.
fn blend_frame(
    pool: &FrameBufferPool,
    a: &Frame,
    b: &Frame,
    t: f32,
    pair: u64,
    filters_cfg: &FilterConfig,
) -> Result<Frame> {
    let mut lease = pool.acquire(a.meta.format, a.meta.width, a.meta.height)?;

    let weight = (t.clamp(0.0, 1.0) * 256.0) as i32;
    let out = lease.as_mut_slice();
    let n = out.len().min(a.data.len()).min(b.data.len());
    for i in 0..n {
        let pa = a.data[i] as i32;
        let pb = b.data[i] as i32;
        out[i] = (pa + (((pb - pa) * weight) >> 8)) as u8;
    }

    if filters_cfg.sharpen > 0.0 && a.meta.format == PixelFormat::Rgba8 {
        filters::sharpen_cas(out, a.meta.width, a.meta.height, filters_cfg.sharpen);
    }

    let span = b.timestamp.duration_since(a.timestamp);
    let meta = FrameMetadata {
        sequence: a.meta.sequence,
        width: a.meta.width,
        height: a.meta.height,
        stride: a.meta.stride,
        format: a.meta.format,
        kind: FrameKind::Synthetic { pair, fraction: t },
    };

    Ok(Frame {
        data: lease.freeze(),
        meta: Arc::new(meta),
        timestamp: a.timestamp + span.mul_f64(t as f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate::fractions_for_multiplier;
    use std::time::Duration;

    fn solid_frame(pool: &FrameBufferPool, level: u8, seq: u64, at: Instant) -> Frame {
        let mut lease = pool.acquire(PixelFormat::Rgba8, 4, 4).expect("acquire");
        for byte in lease.as_mut_slice() {
            *byte = level;
        }
        Frame {
            data: lease.freeze(),
            meta: Arc::new(FrameMetadata {
                sequence: seq,
                width: 4,
                height: 4,
                stride: 4,
                format: PixelFormat::Rgba8,
                kind: FrameKind::Real,
            }),
            timestamp: at,
        }
    }

    fn no_filters() -> FilterConfig {
        FilterConfig {
            sharpen: 0.0,
            ..FilterConfig::default()
        }
    }

    fn poll_until_terminal(backend: &mut BlendInterpolator, handle: RequestHandle) -> RequestStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match backend.poll(handle) {
                RequestStatus::Pending => {
                    assert!(Instant::now() < deadline, "worker never finished");
                    std::thread::sleep(Duration::from_millis(1));
                }
                terminal => return terminal,
            }
        }
    }

    #[test]
    fn midpoint_blend_averages_the_inputs() {
        let pool = FrameBufferPool::new(8);
        let t0 = Instant::now();
        let a = solid_frame(&pool, 10, 1, t0);
        let b = solid_frame(&pool, 30, 2, t0 + Duration::from_millis(16));

        let mut backend = BlendInterpolator::new(pool, no_filters());
        let handle = backend
            .submit(InterpolationJob {
                pair: 1,
                first: a,
                second: b,
                fractions: vec![0.5],
            })
            .expect("submit");

        match poll_until_terminal(&mut backend, handle) {
            RequestStatus::Complete(frames) => {
                assert_eq!(frames.len(), 1);
                let mid = &frames[0];
                assert!(mid.data.iter().all(|&px| (19..=21).contains(&px)));
                assert_eq!(
                    mid.kind(),
                    FrameKind::Synthetic {
                        pair: 1,
                        fraction: 0.5
                    }
                );
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn frames_arrive_in_fraction_order() {
        let pool = FrameBufferPool::new(8);
        let t0 = Instant::now();
        let a = solid_frame(&pool, 0, 1, t0);
        let b = solid_frame(&pool, 200, 2, t0 + Duration::from_millis(16));

        let mut backend = BlendInterpolator::new(pool, no_filters());
        let handle = backend
            .submit(InterpolationJob {
                pair: 7,
                first: a,
                second: b,
                fractions: fractions_for_multiplier(4),
            })
            .expect("submit");

        match poll_until_terminal(&mut backend, handle) {
            RequestStatus::Complete(frames) => {
                assert_eq!(frames.len(), 3);
                let fractions: Vec<f32> = frames
                    .iter()
                    .map(|f| match f.kind() {
                        FrameKind::Synthetic { fraction, .. } => fraction,
                        other => panic!("expected synthetic, got {other:?}"),
                    })
                    .collect();
                assert_eq!(fractions, vec![0.25, 0.5, 0.75]);
                assert!(frames.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn geometry_mismatch_fails_the_request() {
        let pool = FrameBufferPool::new(8);
        let t0 = Instant::now();
        let a = solid_frame(&pool, 0, 1, t0);
        let mut lease = pool.acquire(PixelFormat::Rgba8, 8, 8).expect("acquire");
        lease.fill_from(&[0; 256]);
        let b = Frame {
            data: lease.freeze(),
            meta: Arc::new(FrameMetadata {
                sequence: 2,
                width: 8,
                height: 8,
                stride: 8,
                format: PixelFormat::Rgba8,
                kind: FrameKind::Real,
            }),
            timestamp: t0 + Duration::from_millis(16),
        };

        let mut backend = BlendInterpolator::new(pool, no_filters());
        let handle = backend
            .submit(InterpolationJob {
                pair: 3,
                first: a,
                second: b,
                fractions: vec![0.5],
            })
            .expect("submit");

        match poll_until_terminal(&mut backend, handle) {
            RequestStatus::Failed(reason) => assert!(reason.contains("geometry")),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn unknown_handles_fail_instead_of_hanging() {
        let pool = FrameBufferPool::new(2);
        let mut backend = BlendInterpolator::new(pool, no_filters());
        match backend.poll(RequestHandle(999)) {
            RequestStatus::Failed(reason) => assert!(reason.contains("unknown")),
            other => panic!("unexpected status: {other:?}"),
        }
    }
}

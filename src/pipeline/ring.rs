//! Drop-oldest frame ring between the capture task and the scheduler.
//!
//! Capture never blocks on a slow consumer: when the ring is full the
//! oldest frame is displaced (and its buffer released), which is the
//! correct policy for "latest frame wins" screen capture.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::frame::Frame;

#[derive(Default)]
struct RingStats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

pub struct FrameRing {
    ring: Mutex<HeapRb<Frame>>,
    stats: CachePadded<RingStats>,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.max(1))),
            stats: CachePadded::new(RingStats::default()),
        }
    }

    /// Producer side: push a frame, displacing the oldest when full.
    pub fn push(&self, frame: Frame) {
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        if ring.push_overwrite(frame).is_some() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ring_frames_dropped").increment(1);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer side: oldest remaining frame, if any.
    pub fn pop(&self) -> Option<Frame> {
        let mut ring = self.ring.lock().ok()?;
        let frame = ring.try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.ring.lock().map(|r| r.occupied_len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (written, read, dropped)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameKind, FrameMetadata, PixelFormat};
    use crate::pool::FrameBufferPool;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(pool: &FrameBufferPool, seq: u64) -> Frame {
        Frame {
            data: pool.acquire(PixelFormat::Rgba8, 2, 2).expect("acquire").freeze(),
            meta: Arc::new(FrameMetadata {
                sequence: seq,
                width: 2,
                height: 2,
                stride: 2,
                format: PixelFormat::Rgba8,
                kind: FrameKind::Real,
            }),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn overflow_displaces_the_oldest_frame() {
        let pool = FrameBufferPool::new(8);
        let ring = FrameRing::new(2);
        ring.push(frame(&pool, 1));
        ring.push(frame(&pool, 2));
        ring.push(frame(&pool, 3));

        assert_eq!(ring.pop().map(|f| f.meta.sequence), Some(2));
        assert_eq!(ring.pop().map(|f| f.meta.sequence), Some(3));
        assert!(ring.pop().is_none());

        let (written, read, dropped) = ring.stats();
        assert_eq!(written, 3);
        assert_eq!(read, 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn displaced_frames_release_their_buffers() {
        let pool = FrameBufferPool::new(8);
        let ring = FrameRing::new(1);
        ring.push(frame(&pool, 1));
        ring.push(frame(&pool, 2));
        // Only the surviving frame holds a buffer.
        assert_eq!(pool.in_flight(), 1);
        drop(ring);
        assert_eq!(pool.in_flight(), 0);
    }
}

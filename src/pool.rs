//! Fixed-capacity frame buffer pool.
//!
//! Buffers are recycled through a free list keyed by byte length, so steady
//! state allocates nothing per frame. The pool enforces a hard cap on
//! in-flight buffers: hitting it yields [`PipelineError::PoolExhausted`],
//! which callers treat as a drop-oldest-and-retry signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use crossbeam::utils::CachePadded;
use tracing::trace;

use crate::error::{PipelineError, Result};
use crate::frame::PixelFormat;

#[derive(Default)]
struct PoolStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    reused: AtomicUsize,
    exhausted: AtomicUsize,
}

struct PoolShared {
    capacity: usize,
    free: Mutex<HashMap<usize, Vec<BytesMut>>>,
    in_flight: AtomicUsize,
    stats: CachePadded<PoolStats>,
}

impl PoolShared {
    fn recycle(&self, buf: BytesMut) {
        let key = buf.len();
        if let Ok(mut free) = self.free.lock() {
            free.entry(key).or_default().push(buf);
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.stats.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// Reusable pixel-buffer pool shared by capture, interpolation, and
/// presentation-side scaling.
#[derive(Clone)]
pub struct FrameBufferPool {
    shared: Arc<PoolShared>,
}

impl FrameBufferPool {
    /// `capacity` bounds the number of buffers in flight at once, across all
    /// producers.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                capacity,
                free: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                stats: CachePadded::new(PoolStats::default()),
            }),
        }
    }

    /// Hand out a uniquely-owned writable buffer sized for one frame.
    pub fn acquire(&self, format: PixelFormat, width: u32, height: u32) -> Result<BufferLease> {
        let shared = &self.shared;
        // Reserve a slot first so concurrent acquirers can't overshoot.
        let prev = shared.in_flight.fetch_add(1, Ordering::AcqRel);
        if prev >= shared.capacity {
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            shared.stats.exhausted.fetch_add(1, Ordering::Relaxed);
            return Err(PipelineError::PoolExhausted {
                in_flight: prev,
                capacity: shared.capacity,
            });
        }

        let byte_len = width as usize * height as usize * format.bytes_per_pixel();
        let recycled = shared
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.get_mut(&byte_len).and_then(Vec::pop));

        let data = match recycled {
            Some(buf) => {
                shared.stats.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                trace!(byte_len, "allocating new pool buffer");
                BytesMut::zeroed(byte_len)
            }
        };
        shared.stats.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(BufferLease {
            data: Some(data),
            shared: Arc::clone(shared),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// (acquired, released, reused, exhausted)
    pub fn stats(&self) -> (usize, usize, usize, usize) {
        let s = &self.shared.stats;
        (
            s.acquired.load(Ordering::Relaxed),
            s.released.load(Ordering::Relaxed),
            s.reused.load(Ordering::Relaxed),
            s.exhausted.load(Ordering::Relaxed),
        )
    }
}

/// Uniquely-owned writable buffer. Freeze it into a [`PooledBuffer`] once
/// the pixels are written; dropping an unfrozen lease returns the buffer.
///
/// The lease/freeze split is what guarantees a buffer is never written
/// while a presentation still references it.
pub struct BufferLease {
    data: Option<BytesMut>,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease")
            .field("len", &self.data.as_ref().map(|d| d.len()))
            .finish()
    }
}

impl BufferLease {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_mut().map(|d| &mut d[..]).unwrap_or(&mut [])
    }

    /// Copy `src` into the buffer, truncating to the buffer length.
    pub fn fill_from(&mut self, src: &[u8]) {
        let dst = self.as_mut_slice();
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
    }

    /// Seal the buffer into an immutable, shareable handle.
    pub fn freeze(mut self) -> PooledBuffer {
        let data = self.data.take();
        PooledBuffer {
            inner: Arc::new(PooledInner {
                data,
                shared: Arc::clone(&self.shared),
            }),
        }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buf) = self.data.take() {
            self.shared.recycle(buf);
        }
    }
}

struct PooledInner {
    data: Option<BytesMut>,
    shared: Arc<PoolShared>,
}

impl Drop for PooledInner {
    fn drop(&mut self) {
        if let Some(buf) = self.data.take() {
            self.shared.recycle(buf);
        }
    }
}

/// Immutable reference-counted pixel buffer. Release happens when the last
/// clone drops (or via [`PooledBuffer::release`]), and is idempotent: the
/// backing allocation returns to the free list exactly once.
#[derive(Clone)]
pub struct PooledBuffer {
    inner: Arc<PooledInner>,
}

impl PooledBuffer {
    /// Explicit release; equivalent to dropping this handle.
    pub fn release(self) {}
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.inner.data.as_ref().map(|d| &d[..]).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: PixelFormat = PixelFormat::Rgba8;

    #[test]
    fn accounting_balances_across_acquire_and_release() {
        let pool = FrameBufferPool::new(4);
        let a = pool.acquire(FMT, 8, 8).expect("acquire a").freeze();
        let b = pool.acquire(FMT, 8, 8).expect("acquire b").freeze();
        assert_eq!(pool.in_flight(), 2);

        let a2 = a.clone();
        drop(a);
        // still referenced by the clone
        assert_eq!(pool.in_flight(), 2);
        drop(a2);
        assert_eq!(pool.in_flight(), 1);
        drop(b);
        assert_eq!(pool.in_flight(), 0);

        let (acquired, released, _, _) = pool.stats();
        assert_eq!(acquired, 2);
        assert_eq!(released, 2);
    }

    #[test]
    fn exhaustion_is_reported_at_capacity() {
        let pool = FrameBufferPool::new(2);
        let _a = pool.acquire(FMT, 4, 4).expect("first").freeze();
        let _b = pool.acquire(FMT, 4, 4).expect("second").freeze();
        let err = pool.acquire(FMT, 4, 4).expect_err("third must exhaust");
        match err {
            PipelineError::PoolExhausted {
                in_flight,
                capacity,
            } => {
                assert_eq!(in_flight, 2);
                assert_eq!(capacity, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let (_, _, _, exhausted) = pool.stats();
        assert_eq!(exhausted, 1);
    }

    #[test]
    fn identical_sizes_reuse_the_allocation() {
        let pool = FrameBufferPool::new(2);
        drop(pool.acquire(FMT, 16, 16).expect("warm up").freeze());
        drop(pool.acquire(FMT, 16, 16).expect("recycled"));
        let (_, _, reused, _) = pool.stats();
        assert_eq!(reused, 1);
    }

    #[test]
    fn dropped_lease_returns_without_freeze() {
        let pool = FrameBufferPool::new(1);
        let lease = pool.acquire(FMT, 4, 4).expect("acquire");
        drop(lease);
        assert_eq!(pool.in_flight(), 0);
        // slot is free again
        pool.acquire(FMT, 4, 4).expect("reacquire");
    }

    #[test]
    fn lease_writes_are_visible_after_freeze() {
        let pool = FrameBufferPool::new(1);
        let mut lease = pool.acquire(FMT, 2, 1).expect("acquire");
        lease.fill_from(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let buf = lease.freeze();
        assert_eq!(&buf[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}

//! Shared pool of fixed-size buffer segments.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Default segment size: large enough that a typical event envelope fits in
/// one segment, small enough that a reader's window stays cheap.
pub const DEFAULT_SEGMENT_SIZE: usize = 8 * 1024;

/// One rented buffer segment: a fixed-capacity byte buffer plus the number
/// of bytes the reader has filled into it.
#[derive(Debug)]
pub(crate) struct Segment {
    buf: Box<[u8]>,
    len: usize,
}

impl Segment {
    /// The filled bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The filled length.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// The whole backing buffer, for filling.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// The fixed capacity.
    pub const fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Records how many bytes were filled.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.buf.len());
        self.len = len;
    }
}

#[derive(Debug)]
struct PoolInner {
    segment_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    outstanding: AtomicUsize,
}

/// A shared arena of fixed-size byte buffers.
///
/// Readers rent segments one at a time and must return every segment they
/// hold on every exit path; [`SegmentPool::outstanding`] exposes the number
/// currently checked out so tests can verify the release discipline.
///
/// Cloning is cheap and shares the same arena.
#[derive(Debug, Clone)]
pub struct SegmentPool {
    inner: Arc<PoolInner>,
}

impl SegmentPool {
    /// Creates a pool handing out segments of `segment_size` bytes.
    pub fn new(segment_size: usize) -> Self {
        assert!(segment_size > 0, "segment size must be non-zero");
        Self {
            inner: Arc::new(PoolInner {
                segment_size,
                free: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// The fixed size of every segment this pool hands out.
    pub fn segment_size(&self) -> usize {
        self.inner.segment_size
    }

    /// How many segments are currently checked out of the pool.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Rents one empty segment, reusing a returned buffer when one is free.
    pub(crate) fn rent(&self) -> Segment {
        let buf = self
            .inner
            .free
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.segment_size].into_boxed_slice());
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        Segment { buf, len: 0 }
    }

    /// Returns a segment's buffer to the free list.
    pub(crate) fn give_back(&self, segment: Segment) {
        self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.inner
            .free
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(segment.buf);
    }
}

impl Default for SegmentPool {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_and_return_tracks_outstanding() {
        let pool = SegmentPool::new(16);
        assert_eq!(pool.outstanding(), 0);

        let a = pool.rent();
        let b = pool.rent();
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(a.capacity(), 16);

        pool.give_back(a);
        pool.give_back(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn returned_buffers_are_reused() {
        let pool = SegmentPool::new(16);
        let mut seg = pool.rent();
        seg.buf_mut()[0] = 42;
        seg.set_len(1);
        pool.give_back(seg);

        // The recycled buffer comes back with a zero fill length.
        let seg = pool.rent();
        assert_eq!(seg.len(), 0);
        assert!(seg.bytes().is_empty());
        pool.give_back(seg);
    }

    #[test]
    #[should_panic(expected = "segment size must be non-zero")]
    fn zero_segment_size_is_rejected() {
        let _ = SegmentPool::new(0);
    }
}

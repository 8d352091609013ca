//! Memory shared by every handle on a buffer.

use crate::{Allocation, Allocator};
use std::{
    ops::Range,
    ptr::NonNull,
    slice,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::trace;

/// The backing memory of a root buffer and all of its slices.
///
/// The region is reference counted by wrapping it in an [Arc]; dropping the last handle returns
/// the memory to the allocator it came from (or frees it, for plain memory).
///
/// # Sealing
///
/// Handles on one region read and write disjoint byte ranges. Each slice raises the region's
/// seal to its end offset, and bytes below the seal may only be mutated by a handle that owns
/// the region exclusively. See [crate::ByteBuffer] for where this is enforced.
pub(crate) struct Region {
    ptr: NonNull<[u8]>,
    pool: Option<Arc<dyn Allocator>>,
    sealed: AtomicUsize,
}

// SAFETY: the region owns its memory, and handles only access disjoint ranges of it (reads
// below the seal, writes at or above it unless the writer holds the only reference).
unsafe impl Send for Region {}
// SAFETY: see above.
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn new(allocation: Allocation) -> Self {
        let Allocation { bytes, pool } = allocation;
        Self {
            ptr: NonNull::from(Box::leak(bytes)),
            pool,
            sealed: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.ptr.len()
    }

    #[inline]
    pub(crate) fn pool(&self) -> Option<&Arc<dyn Allocator>> {
        self.pool.as_ref()
    }

    #[inline]
    pub(crate) fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Marks `[0, end)` as visible through another handle.
    #[inline]
    pub(crate) fn seal(&self, end: usize) {
        self.sealed.fetch_max(end, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn sealed(&self) -> usize {
        self.sealed.load(Ordering::Acquire)
    }

    /// Clears the seal. Requires exclusive access, so no other handle can observe the region.
    #[inline]
    pub(crate) fn unseal(&mut self) {
        *self.sealed.get_mut() = 0;
    }

    /// Borrows `range` of the region.
    ///
    /// # Safety
    ///
    /// No handle may mutate any byte of `range` while the returned slice is alive.
    #[inline]
    pub(crate) unsafe fn bytes(&self, range: Range<usize>) -> &[u8] {
        assert!(
            range.start <= range.end && range.end <= self.len(),
            "range {range:?} outside region of {} bytes",
            self.len()
        );
        // SAFETY: range is within the allocation and the caller rules out concurrent writes.
        unsafe { slice::from_raw_parts(self.ptr.cast::<u8>().as_ptr().add(range.start), range.len()) }
    }

    /// Mutably borrows `range` of the region.
    ///
    /// # Safety
    ///
    /// No other borrow of any byte of `range` may be alive while the returned slice is alive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, range: Range<usize>) -> &mut [u8] {
        assert!(
            range.start <= range.end && range.end <= self.len(),
            "range {range:?} outside region of {} bytes",
            self.len()
        );
        // SAFETY: range is within the allocation and the caller guarantees exclusivity.
        unsafe {
            slice::from_raw_parts_mut(self.ptr.cast::<u8>().as_ptr().add(range.start), range.len())
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `ptr` was leaked from a `Box` in `new` and is reclaimed exactly once, here.
        let bytes = unsafe { Box::from_raw(self.ptr.as_ptr()) };
        if let Some(pool) = self.pool.take() {
            trace!(len = bytes.len(), "returning region to pool");
            pool.recycle(bytes);
        }
    }
}

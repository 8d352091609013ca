//! Windowed handles over shared regions.
//!
//! # Cursors
//!
//! Every [ByteBuffer] maintains `start <= read <= write <= end` over its region:
//!
//! - [ByteBuffer::capacity] is `end - start`
//! - [ByteBuffer::length] is `write - read` (unread content)
//! - [ByteBuffer::size] is `end - write` (free room)
//!
//! Cursor moves that would break the ordering are contract breaches and panic. Insufficient
//! room or content is reported by [ByteBuffer::validate] as an [Error].
//!
//! # Sharing
//!
//! [ByteBuffer::get_slice] and [ByteBuffer::add_reference] return new handles on the same
//! region. The region stays alive (and out of its pool) until every handle is dropped. While a
//! region is shared:
//!
//! - it cannot be reallocated, so growth fails with [Error::SharedBufferCannotGrow]
//! - bytes visible through another handle cannot be mutated; attempting to do so panics
//!
//! A handle that becomes the sole owner of its region regains full write access.

use crate::{
    allocator::{shared_pool, transport_pool},
    diagnostics::{Kind, Ticket},
    region::Region,
    Allocation, Allocator, Error,
};
use bytes::{buf::UninitSlice, Buf, BufMut};
use std::{
    fmt,
    ops::Range,
    panic::Location,
    sync::{Arc, Weak},
};
use tracing::debug;

/// The side of the window checked by [ByteBuffer::validate].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Unread content (`write - read`).
    Read,
    /// Free room (`end - write`).
    Write,
}

/// A window over a (possibly shared) region with independent read and write cursors.
///
/// Dropping a handle releases its reference. The region returns to its pool when the last
/// handle is dropped.
pub struct ByteBuffer {
    region: Arc<Region>,
    start: usize,
    read: usize,
    write: usize,
    end: usize,
    auto_grow: bool,
    _ticket: Option<Ticket>,
}

impl ByteBuffer {
    /// Creates an empty buffer of `capacity` bytes on the heap, outside any pool.
    pub fn new(capacity: usize) -> Self {
        Self::from_allocation(Allocation::heap(capacity), capacity, None)
    }

    /// Wraps caller-owned memory. All of it is unread content.
    pub fn wrap(bytes: impl Into<Box<[u8]>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len();
        Self::wrap_window(bytes, 0, len)
    }

    /// Wraps caller-owned memory with `[offset, offset + len)` as unread content.
    ///
    /// The window spans the whole memory, so anything past the content is free room.
    ///
    /// # Panics
    ///
    /// Panics if the content does not fit within `bytes`.
    pub fn wrap_window(bytes: impl Into<Box<[u8]>>, offset: usize, len: usize) -> Self {
        let bytes = bytes.into();
        let capacity = bytes.len();
        assert!(
            offset <= capacity && len <= capacity - offset,
            "content [{offset}, {offset}+{len}) exceeds wrapped memory of {capacity} bytes"
        );
        let mut buffer = Self::from_allocation(
            Allocation {
                bytes,
                pool: None,
            },
            capacity,
            None,
        );
        buffer.read = offset;
        buffer.write = offset + len;
        buffer
    }

    /// Allocates an empty buffer of `size` bytes from the shared pool.
    #[track_caller]
    pub fn allocate(size: usize) -> Self {
        let pool: Arc<dyn Allocator> = shared_pool().clone();
        Self::allocate_in(size, &pool)
    }

    /// Allocates an empty buffer of `size` bytes from the transport pool.
    ///
    /// Uses the shared pool if the transport pool has not been configured.
    #[track_caller]
    pub fn allocate_transport(size: usize) -> Self {
        match transport_pool() {
            Some(transport) => {
                let pool: Arc<dyn Allocator> = transport.clone();
                Self::allocate_in(size, &pool)
            }
            None => Self::allocate(size),
        }
    }

    /// Allocates an empty buffer of `size` bytes from `pool`.
    ///
    /// Falls back to the shared pool, then the heap, when `pool` cannot serve the request.
    #[track_caller]
    pub fn allocate_in(size: usize, pool: &Arc<dyn Allocator>) -> Self {
        Self::from_allocation(
            Allocation::from_pool(size, pool),
            size,
            Some(Location::caller()),
        )
    }

    fn from_allocation(
        allocation: Allocation,
        capacity: usize,
        origin: Option<&'static Location<'static>>,
    ) -> Self {
        assert!(
            allocation.bytes.len() >= capacity,
            "allocation of {} bytes cannot back a window of {capacity}",
            allocation.bytes.len()
        );
        let region = Region::new(allocation);
        let ticket = match origin {
            Some(origin) if region.is_pooled() => Ticket::issue(Kind::Allocated, capacity, origin),
            _ => None,
        };
        Self {
            region: Arc::new(region),
            start: 0,
            read: 0,
            write: 0,
            end: capacity,
            auto_grow: false,
            _ticket: ticket,
        }
    }

    /// Sets whether writes that do not fit may reallocate the buffer (see [ByteBuffer::validate]).
    pub fn with_auto_grow(mut self, enabled: bool) -> Self {
        self.auto_grow = enabled;
        self
    }

    /// Returns whether writes that do not fit may reallocate the buffer.
    pub fn auto_grows(&self) -> bool {
        self.auto_grow
    }

    /// Size of the window.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Read cursor, as an absolute position in the region.
    #[inline]
    pub fn offset(&self) -> usize {
        self.read
    }

    /// Write cursor, as an absolute position in the region.
    #[inline]
    pub fn write_pos(&self) -> usize {
        self.write
    }

    /// Free room after the write cursor.
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.write
    }

    /// Unread content between the cursors.
    #[inline]
    pub fn length(&self) -> usize {
        self.write - self.read
    }

    /// Number of live handles sharing this buffer's region.
    pub fn references(&self) -> usize {
        Arc::strong_count(&self.region)
    }

    /// Returns whether the region will be returned to a pool on release.
    pub fn is_pooled(&self) -> bool {
        self.region.is_pooled()
    }

    /// Checks that `required` bytes can be read or written.
    ///
    /// For [Access::Write], a buffer created [with auto-grow](ByteBuffer::with_auto_grow) first
    /// reallocates to `max(2 * capacity, capacity + required)` bytes, preserving its content and
    /// cursors relative to the window. Reallocation is refused while the region is shared.
    pub fn validate(&mut self, access: Access, required: usize) -> Result<(), Error> {
        let available = match access {
            Access::Read => self.length(),
            Access::Write => {
                if self.auto_grow && self.size() < required {
                    self.grow(required)?;
                }
                self.size()
            }
        };
        if available < required {
            return Err(Error::InsufficientCapacity {
                requested: required,
                available,
            });
        }
        Ok(())
    }

    fn grow(&mut self, required: usize) -> Result<(), Error> {
        let references = self.references();
        if references != 1 {
            debug!(references, required, "refusing to grow shared buffer");
            return Err(Error::SharedBufferCannotGrow { references });
        }

        let capacity = self.capacity();
        let target = usize::max(capacity.saturating_mul(2), capacity.saturating_add(required));
        let allocation = match self.region.pool() {
            Some(pool) => Allocation::from_pool(target, pool),
            None => Allocation::heap(target),
        };
        assert!(
            allocation.bytes.len() >= target,
            "allocation of {} bytes cannot back a window of {target}",
            allocation.bytes.len()
        );
        let region = Region::new(allocation);
        // SAFETY: the new region is not yet visible to any other handle, and the old window
        // is only read.
        unsafe {
            region
                .bytes_mut(0..capacity)
                .copy_from_slice(self.region.bytes(self.start..self.end));
        }
        debug!(from = capacity, to = target, "grew buffer");

        self.read -= self.start;
        self.write -= self.start;
        self.start = 0;
        self.end = target;
        // Replacing the handle releases the old region back to its pool.
        self.region = Arc::new(region);
        Ok(())
    }

    /// Marks `n` bytes of free room as written.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [ByteBuffer::size].
    pub fn append(&mut self, n: usize) {
        assert!(
            n <= self.size(),
            "cannot append {n} bytes with {} bytes of room",
            self.size()
        );
        self.write += n;
    }

    /// Marks `n` bytes of unread content as consumed.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [ByteBuffer::length].
    pub fn complete(&mut self, n: usize) {
        assert!(
            n <= self.length(),
            "cannot complete {n} bytes with {} bytes unread",
            self.length()
        );
        self.read += n;
    }

    /// Moves the read cursor to absolute `position`.
    ///
    /// # Panics
    ///
    /// Panics unless `start <= position <= write`.
    pub fn seek(&mut self, position: usize) {
        assert!(
            self.start <= position && position <= self.write,
            "cannot seek to {position} outside [{}, {}]",
            self.start,
            self.write
        );
        self.read = position;
    }

    /// Moves both cursors back to the start of the window. Memory is not reallocated.
    pub fn reset(&mut self) {
        self.read = self.start;
        self.write = self.start;
    }

    /// Sets the unread content to `[offset, offset + len)` (absolute positions).
    ///
    /// # Panics
    ///
    /// Panics if the content does not lie within the window.
    pub fn adjust_position(&mut self, offset: usize, len: usize) {
        assert!(
            self.start <= offset && offset <= self.end && len <= self.end - offset,
            "content [{offset}, {offset}+{len}) outside window [{}, {})",
            self.start,
            self.end
        );
        self.read = offset;
        self.write = offset + len;
    }

    /// Returns a new handle viewing `[position, position + length)` of this buffer's region.
    ///
    /// No bytes are copied. The slice starts with its whole window as unread content, has no
    /// free room and never grows. Slicing a slice shares the same region.
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie within this handle's window. Slicing a slice is bounded
    /// by the slice's own window, not by the whole region, even though both share the region.
    #[track_caller]
    pub fn get_slice(&self, position: usize, length: usize) -> ByteBuffer {
        let end = position.saturating_add(length);
        assert!(
            self.start <= position && end <= self.end,
            "slice [{position}, {end}) outside window [{}, {})",
            self.start,
            self.end
        );
        self.region.seal(end);
        ByteBuffer {
            region: self.region.clone(),
            start: position,
            read: position,
            write: end,
            end,
            auto_grow: false,
            _ticket: self.ticket(length, Location::caller()),
        }
    }

    /// Returns a new handle on this buffer's unread content, to hand to another owner.
    ///
    /// Each owner releases its handle independently.
    #[track_caller]
    pub fn add_reference(&self) -> ByteBuffer {
        self.get_slice(self.read, self.length())
    }

    /// Returns a handle that can recover this buffer's unread content without keeping the
    /// region alive.
    pub fn downgrade(&self) -> WeakByteBuffer {
        self.region.seal(self.write);
        WeakByteBuffer {
            region: Arc::downgrade(&self.region),
            start: self.read,
            end: self.write,
        }
    }

    /// Releases this handle. Equivalent to dropping it.
    pub fn dispose(self) {}

    fn ticket(&self, capacity: usize, origin: &'static Location<'static>) -> Option<Ticket> {
        if !self.region.is_pooled() {
            return None;
        }
        Ticket::issue(Kind::Sliced, capacity, origin)
    }

    /// Unread content.
    pub fn unread(&self) -> &[u8] {
        // SAFETY: bytes below the write cursor are only mutated through `&mut self`, or by a
        // sole owner of the region (see `claim`).
        unsafe { self.region.bytes(self.read..self.write) }
    }

    /// Unread content, mutably.
    ///
    /// # Panics
    ///
    /// Panics if any of the content is visible through another handle.
    pub fn unread_mut(&mut self) -> &mut [u8] {
        let range = self.read..self.write;
        self.claim(&range);
        // SAFETY: `claim` ensured no other handle can observe `range`.
        unsafe { self.region.bytes_mut(range) }
    }

    /// Free room after the write cursor. Written bytes become content after [ByteBuffer::append].
    ///
    /// # Panics
    ///
    /// Panics if any of the room is visible through another handle (e.g. after [ByteBuffer::reset]
    /// while slices are alive).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let range = self.write..self.end;
        self.claim(&range);
        // SAFETY: `claim` ensured no other handle can observe `range`.
        unsafe { self.region.bytes_mut(range) }
    }

    /// Ensures no other handle can observe `range`, clearing the seal if this handle is the
    /// sole owner.
    fn claim(&mut self, range: &Range<usize>) {
        if range.is_empty() || range.start >= self.region.sealed() {
            return;
        }
        match Arc::get_mut(&mut self.region) {
            Some(region) => region.unseal(),
            None => panic!(
                "bytes from offset {} are still visible through another handle",
                range.start
            ),
        }
    }

    /// Writes `src` after the content, growing first if permitted.
    pub fn put(&mut self, src: &[u8]) -> Result<(), Error> {
        self.validate(Access::Write, src.len())?;
        self.spare_mut()[..src.len()].copy_from_slice(src);
        self.append(src.len());
        Ok(())
    }

    /// Copies the unread content.
    pub fn to_vec(&self) -> Vec<u8> {
        self.unread().to_vec()
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("start", &self.start)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("end", &self.end)
            .field("auto_grow", &self.auto_grow)
            .field("references", &self.references())
            .finish()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.unread()
    }
}

impl Buf for ByteBuffer {
    #[inline]
    fn remaining(&self) -> usize {
        self.length()
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        self.unread()
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        self.complete(cnt);
    }
}

// SAFETY: `chunk_mut` exposes exactly the free room, and `advance_mut` never moves the write
// cursor past the end of the window.
unsafe impl BufMut for ByteBuffer {
    #[inline]
    fn remaining_mut(&self) -> usize {
        self.size()
    }

    #[inline]
    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.append(cnt);
    }

    #[inline]
    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(self.spare_mut())
    }
}

/// A handle on a buffer's content that does not keep the region alive.
///
/// Obtained from [ByteBuffer::downgrade].
#[derive(Clone)]
pub struct WeakByteBuffer {
    region: Weak<Region>,
    start: usize,
    end: usize,
}

impl WeakByteBuffer {
    /// Returns a new handle on the content, or `None` if every handle has been released.
    #[track_caller]
    pub fn try_add_reference(&self) -> Option<ByteBuffer> {
        let region = self.region.upgrade()?;
        let ticket = if region.is_pooled() {
            Ticket::issue(Kind::Sliced, self.end - self.start, Location::caller())
        } else {
            None
        };
        Some(ByteBuffer {
            region,
            start: self.start,
            read: self.start,
            write: self.end,
            end: self.end,
            auto_grow: false,
            _ticket: ticket,
        })
    }

    /// Returns a new handle on the content.
    ///
    /// Fails with [Error::AlreadyReclaimed] once every handle has been released.
    #[track_caller]
    pub fn add_reference(&self) -> Result<ByteBuffer, Error> {
        self.try_add_reference().ok_or(Error::AlreadyReclaimed)
    }

    /// Number of live handles on the region (zero once reclaimed).
    pub fn references(&self) -> usize {
        self.region.strong_count()
    }
}

impl fmt::Debug for WeakByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakByteBuffer")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("references", &self.references())
            .finish()
    }
}

//! Pool-backed, windowed, reference-counted byte buffers for staging wire messages.
//!
//! A [ByteBuffer] is a window `[start, end)` over a region of memory with a read cursor and a
//! write cursor inside it:
//!
//! ```text
//!   start        read            write              end
//!     |-----------|###############|------------------|
//!      consumed        unread         free room
//! ```
//!
//! Slices ([ByteBuffer::get_slice]) share the region without copying. The region goes back to
//! the pool it came from once the last handle on it is dropped.
//!
//! # Example
//!
//! ```
//! use stagebuf_buffer::{Access, ByteBuffer};
//!
//! let mut buffer = ByteBuffer::allocate(16).with_auto_grow(true);
//! buffer.put(b"header").unwrap();
//! buffer.put(b"payload").unwrap();
//!
//! // Hand the payload to another owner without copying it.
//! let payload = buffer.get_slice(buffer.offset() + 6, 7);
//! assert_eq!(payload.unread(), b"payload");
//! assert_eq!(buffer.references(), 2);
//!
//! // The shared region cannot be reallocated underneath the slice.
//! assert!(buffer.validate(Access::Write, 1024).is_err());
//! drop(payload);
//! assert!(buffer.validate(Access::Write, 1024).is_ok());
//! ```

/// Creates a `NonZeroUsize` from a value, panicking if the value is zero.
macro_rules! NZUsize {
    ($val:expr) => {
        match ::core::num::NonZeroUsize::new($val) {
            Some(value) => value,
            None => panic!("value must be non-zero"),
        }
    };
}

mod allocator;
mod buffer;
pub mod diagnostics;
mod error;
mod field;
mod pool;
mod region;

pub use allocator::{configure_transport_pool, shared_pool, transport_pool, Allocation, Allocator};
pub use buffer::{Access, ByteBuffer, WeakByteBuffer};
pub use error::Error;
pub use pool::{SharedPool, SharedPoolConfig, TransportPool, TransportPoolConfig};

//! Core codec traits

use crate::error::Error;
use bytes::{Buf, BufMut, BytesMut};

/// Trait for types that can be written (encoded) to a buffer.
pub trait Write {
    /// Encodes this value by writing to a buffer.
    ///
    /// Implementations should panic if the buffer doesn't have enough capacity.
    fn write(&self, buf: &mut impl BufMut);
}

/// Trait for types that know the size of their encoding.
pub trait EncodeSize {
    /// Returns the encoded size of this value.
    ///
    /// This method MUST return the exact number of bytes that will be written by `write()`.
    fn encode_size(&self) -> usize;
}

/// Trait for types that can be read (decoded) from a buffer.
///
/// The `Cfg` parameter bounds what the reader will accept, e.g. the maximum length of an
/// opaque field when decoding untrusted input. Use `()` for types that need no configuration.
pub trait Read<Cfg = ()>: Sized {
    /// Reads a value from the buffer using `cfg`, consuming the necessary bytes.
    fn read_cfg(buf: &mut impl Buf, cfg: Cfg) -> Result<Self, Error>;
}

/// Trait for types that can be encoded into a fresh buffer.
pub trait Encode: Write + EncodeSize {
    /// Encodes a value to a `BytesMut` buffer.
    ///
    /// Panics if the `write` implementation does not write the expected number of bytes.
    fn encode(&self) -> BytesMut {
        let len = self.encode_size();
        let mut buffer = BytesMut::with_capacity(len);
        self.write(&mut buffer);
        assert_eq!(buffer.len(), len, "write() did not write expected bytes");
        buffer
    }
}

impl<T: Write + EncodeSize> Encode for T {}

/// Extension trait providing an ergonomic read method for types requiring no configuration.
pub trait ReadExt: Read<()> {
    /// Reads a value using the default `()` config.
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        <Self as Read<()>>::read_cfg(buf, ())
    }
}

impl<T: Read<()>> ReadExt for T {}

/// Decodes a value from `buf`, failing unless the buffer is fully consumed.
pub fn decode<Cfg, T: Read<Cfg>>(mut buf: impl Buf, cfg: Cfg) -> Result<T, Error> {
    let value = T::read_cfg(&mut buf, cfg)?;
    let remaining = buf.remaining();
    if remaining > 0 {
        return Err(Error::ExtraData(remaining));
    }
    Ok(value)
}

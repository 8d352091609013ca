//! Length-prefixed opaque byte fields.
//!
//! An opaque field is a varint length followed by that many raw bytes. For portability between
//! architectures, the length of a field must fit within a [u32].
//!
//! Readers that want to avoid copying the body (for example, to hand out a view into the buffer
//! the field was read from) use [read_len], which consumes only the prefix.

use crate::{varint, EncodeSize, Error, Read, Write};
use bytes::{Buf, BufMut, Bytes};
use std::ops::RangeBounds;

/// Returns the encoded size of an opaque field with a body of `len` bytes.
///
/// # Panics
///
/// Panics if `len` does not fit within a [u32].
#[inline]
pub fn size(len: usize) -> usize {
    varint::size(prefix(len)) + len
}

/// Writes `body` as an opaque field.
///
/// # Panics
///
/// Panics if `buf` lacks room for the encoding or the body length does not fit within a [u32].
#[inline]
pub fn write(body: &[u8], buf: &mut impl BufMut) {
    varint::write(prefix(body.len()), buf);
    buf.put_slice(body);
}

/// Reads the length prefix of an opaque field, leaving the body unread.
///
/// Fails if the length falls outside `range` or if fewer than `len` bytes remain in `buf`.
pub fn read_len(buf: &mut impl Buf, range: &impl RangeBounds<usize>) -> Result<usize, Error> {
    let len = varint::read::<u32>(buf)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidVarint)?;
    if !range.contains(&len) {
        return Err(Error::InvalidLength(len));
    }
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(len)
}

fn prefix(len: usize) -> u32 {
    u32::try_from(len).expect("opaque field length exceeds u32")
}

impl Write for Bytes {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        write(self, buf);
    }
}

impl EncodeSize for Bytes {
    #[inline]
    fn encode_size(&self) -> usize {
        size(self.len())
    }
}

impl<R: RangeBounds<usize>> Read<R> for Bytes {
    #[inline]
    fn read_cfg(buf: &mut impl Buf, range: R) -> Result<Self, Error> {
        let len = read_len(buf, &range)?;
        Ok(buf.copy_to_bytes(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, Encode};

    #[test]
    fn test_bytes() {
        let values = [
            Bytes::new(),
            Bytes::from_static(&[1, 2, 3]),
            Bytes::from(vec![0; 300]),
        ];
        for value in values {
            let encoded = value.encode();
            assert_eq!(encoded.len(), varint::size(value.len() as u64) + value.len());
            let len = value.len();

            let decoded: Bytes = decode(encoded.clone(), len..=len).unwrap();
            assert_eq!(value, decoded);

            assert!(matches!(
                decode::<_, Bytes>(encoded.clone(), ..len),
                Err(Error::InvalidLength(_))
            ));
            assert!(matches!(
                decode::<_, Bytes>(encoded, len + 1..),
                Err(Error::InvalidLength(_))
            ));
        }
    }

    #[test]
    fn test_read_len_leaves_body() {
        let mut encoded = Vec::new();
        write(b"hello", &mut encoded);
        assert_eq!(encoded[0], 5);

        let mut reader = &encoded[..];
        assert_eq!(read_len(&mut reader, &..).unwrap(), 5);
        assert_eq!(reader, b"hello");
    }

    #[test]
    fn test_read_len_truncated_body() {
        let mut reader = &[4, 1, 2][..];
        assert_eq!(read_len(&mut reader, &..), Err(Error::EndOfBuffer));
    }

    #[test]
    fn test_size_crosses_prefix_width() {
        assert_eq!(size(0), 1);
        assert_eq!(size(127), 128);
        assert_eq!(size(128), 130);
    }
}

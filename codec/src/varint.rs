//! Variable-length integer encoding and decoding
//!
//! Unsigned integers are written as LEB128: each byte carries 7 bits of the value, least
//! significant group first, and the high bit is set on every byte except the last.
//!
//! `usize` is omitted to prevent the wire format from depending on the target architecture.

use crate::Error;
use bytes::{Buf, BufMut};

const DATA_BITS_PER_BYTE: u32 = 7;
const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// An unsigned integer that can be varint encoded.
pub trait UInt: Copy + Into<u64> + TryFrom<u64> {
    /// Width of the integer in bits.
    const BITS: u32;
}

macro_rules! impl_uint {
    ($type:ty) => {
        impl UInt for $type {
            const BITS: u32 = <$type>::BITS;
        }
    };
}
impl_uint!(u8);
impl_uint!(u16);
impl_uint!(u32);
impl_uint!(u64);

/// Encodes an unsigned integer as a varint.
pub fn write<T: UInt>(value: T, buf: &mut impl BufMut) {
    let mut value: u64 = value.into();
    while value >= u64::from(CONTINUATION_BIT_MASK) {
        buf.put_u8((value as u8 & DATA_BITS_MASK) | CONTINUATION_BIT_MASK);
        value >>= DATA_BITS_PER_BYTE;
    }
    buf.put_u8(value as u8);
}

/// Decodes an unsigned integer from a varint.
///
/// Fails with [Error::InvalidVarint] if the encoding carries more bits than `T` can hold.
pub fn read<T: UInt>(buf: &mut impl Buf) -> Result<T, Error> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if shift >= T::BITS {
            return Err(Error::InvalidVarint);
        }
        if !buf.has_remaining() {
            return Err(Error::EndOfBuffer);
        }
        let byte = buf.get_u8();
        let data = u64::from(byte & DATA_BITS_MASK);

        // The last group may only use the bits left in `T`.
        let remaining_bits = T::BITS - shift;
        if remaining_bits < DATA_BITS_PER_BYTE && data >> remaining_bits != 0 {
            return Err(Error::InvalidVarint);
        }
        result |= data << shift;

        if byte & CONTINUATION_BIT_MASK == 0 {
            return T::try_from(result).map_err(|_| Error::InvalidVarint);
        }
        shift += DATA_BITS_PER_BYTE;
    }
}

/// Calculates the number of bytes needed to encode an unsigned integer as a varint.
pub fn size<T: UInt>(value: T) -> usize {
    let value: u64 = value.into();
    let data_bits = (u64::BITS - value.leading_zeros()) as usize;
    usize::max(1, data_bits.div_ceil(DATA_BITS_PER_BYTE as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use test_case::test_case;

    #[test_case(0, &[0x00]; "zero")]
    #[test_case(1, &[0x01]; "one")]
    #[test_case(127, &[0x7F]; "largest single byte")]
    #[test_case(128, &[0x80, 0x01]; "smallest two bytes")]
    #[test_case(300, &[0xAC, 0x02]; "three hundred")]
    #[test_case(u32::MAX as u64, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]; "u32 max")]
    fn test_known_encodings(value: u64, expected: &[u8]) {
        let mut buf = Vec::new();
        write(value, &mut buf);
        assert_eq!(buf, expected);
        assert_eq!(size(value), expected.len());

        let mut reader = expected;
        assert_eq!(read::<u64>(&mut reader).unwrap(), value);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_varint_encoding() {
        let test_cases = [
            0u64,
            0x3FFF,
            0x4000,
            0x1FFFFF,
            0xFFFFFFFF,
            0x1FFFFFFFFFF,
            u64::MAX,
        ];
        for &value in &test_cases {
            let mut buf = Vec::new();
            write(value, &mut buf);
            assert_eq!(buf.len(), size(value));

            let mut read_buf = &buf[..];
            let decoded: u64 = read(&mut read_buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(read_buf.len(), 0);
        }
    }

    #[test]
    fn test_varint_insufficient_buffer() {
        let mut buf = Bytes::from_static(&[0x80]);
        assert_eq!(read::<u64>(&mut buf), Err(Error::EndOfBuffer));
    }

    #[test]
    fn test_varint_overflow() {
        // One bit past `u32::MAX`.
        let mut buf = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
        assert_eq!(read::<u32>(&mut buf), Err(Error::InvalidVarint));

        // Continuation never terminates within the width of a `u32`.
        let mut buf = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(read::<u32>(&mut buf), Err(Error::InvalidVarint));
    }

    #[test]
    fn test_varint_narrow_type() {
        let mut buf = &[0x81, 0x01][..];
        assert_eq!(read::<u8>(&mut buf).unwrap(), 0x81);

        let mut buf = &[0x80, 0x02][..];
        assert_eq!(read::<u8>(&mut buf), Err(Error::InvalidVarint));
    }
}

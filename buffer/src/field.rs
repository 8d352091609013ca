//! Opaque-field encoding for [ByteBuffer].
//!
//! A buffer encodes as a length-prefixed field holding its unread content. Decoding does not
//! copy the body: it returns a slice of the source buffer's region.

use crate::{Access, ByteBuffer, Error};
use bytes::BufMut;
use stagebuf_codec::{field, EncodeSize, Write};
use std::ops::RangeBounds;

impl EncodeSize for ByteBuffer {
    #[inline]
    fn encode_size(&self) -> usize {
        field::size(self.length())
    }
}

impl Write for ByteBuffer {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        field::write(self.unread(), buf);
    }
}

impl ByteBuffer {
    /// Appends this buffer's unread content to `target` as an opaque field.
    ///
    /// `target` grows first if it lacks room and permits growth. This buffer's cursors are not
    /// moved.
    pub fn encode_into(&self, target: &mut ByteBuffer) -> Result<(), Error> {
        target.validate(Access::Write, self.encode_size())?;
        Write::write(self, target);
        Ok(())
    }

    /// Reads an opaque field from `source`, returning a slice over its body.
    ///
    /// On success the read cursor of `source` moves past the field. On failure `source` is left
    /// untouched, so a truncated field can be retried once more bytes arrive.
    #[track_caller]
    pub fn decode(source: &mut ByteBuffer) -> Result<ByteBuffer, Error> {
        Self::decode_bounded(source, &..)
    }

    /// Like [ByteBuffer::decode], but fails if the body length falls outside `range`.
    #[track_caller]
    pub fn decode_bounded(
        source: &mut ByteBuffer,
        range: &impl RangeBounds<usize>,
    ) -> Result<ByteBuffer, Error> {
        let mut header = source.unread();
        let len = field::read_len(&mut header, range)?;
        let prefix = source.length() - header.len();

        let body = source.get_slice(source.offset() + prefix, len);
        source.complete(prefix + len);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagebuf_codec::{Encode, Error as CodecError};
    use test_case::test_case;

    #[test]
    fn test_encode_decode() {
        let payload = ByteBuffer::wrap(b"payload".to_vec());
        let mut frame = ByteBuffer::new(4).with_auto_grow(true);
        payload.encode_into(&mut frame).unwrap();
        payload.encode_into(&mut frame).unwrap();
        assert_eq!(payload.length(), 7);
        assert_eq!(frame.length(), 2 * payload.encode_size());
        assert_eq!(frame.unread()[0], 7);

        let first = ByteBuffer::decode(&mut frame).unwrap();
        assert_eq!(first.unread(), b"payload");
        assert_eq!(frame.references(), 2);

        let second = ByteBuffer::decode(&mut frame).unwrap();
        assert_eq!(second.unread(), b"payload");
        assert_eq!(frame.length(), 0);
        assert_eq!(frame.references(), 3);
    }

    #[test]
    fn test_decode_then_encode_reproduces_field() {
        let field = [5, b'h', b'e', b'l', b'l', b'o'];
        let mut source = ByteBuffer::wrap(field.to_vec());
        let body = ByteBuffer::decode(&mut source).unwrap();

        let mut target = ByteBuffer::new(field.len());
        body.encode_into(&mut target).unwrap();
        assert_eq!(target.unread(), &field);
    }

    #[test]
    fn test_encode_matches_codec() {
        let payload = ByteBuffer::wrap(vec![0xAB; 200]);
        let expected = Encode::encode(&payload);
        let mut frame = ByteBuffer::new(payload.encode_size());
        payload.encode_into(&mut frame).unwrap();
        assert_eq!(frame.unread(), &expected[..]);
        assert_eq!(&frame.unread()[..2], &[0xC8, 0x01]);
    }

    #[test]
    fn test_encode_without_room() {
        let payload = ByteBuffer::wrap(b"payload".to_vec());
        let mut frame = ByteBuffer::new(4);
        assert_eq!(
            payload.encode_into(&mut frame),
            Err(Error::InsufficientCapacity {
                requested: 8,
                available: 4,
            })
        );
        assert_eq!(frame.length(), 0);
    }

    #[test_case(&[] => Error::Codec(CodecError::EndOfBuffer); "empty")]
    #[test_case(&[0x80] => Error::Codec(CodecError::EndOfBuffer); "truncated prefix")]
    #[test_case(&[3, 1, 2] => Error::Codec(CodecError::EndOfBuffer); "truncated body")]
    fn test_decode_incomplete(bytes: &[u8]) -> Error {
        let mut source = ByteBuffer::wrap(bytes.to_vec());
        let err = ByteBuffer::decode(&mut source).unwrap_err();
        assert_eq!(source.length(), bytes.len());
        assert_eq!(source.references(), 1);
        err
    }

    #[test]
    fn test_decode_bounded() {
        let mut source = ByteBuffer::wrap(vec![4, 1, 2, 3, 4]);
        assert_eq!(
            ByteBuffer::decode_bounded(&mut source, &..4).unwrap_err(),
            Error::Codec(CodecError::InvalidLength(4))
        );
        let body = ByteBuffer::decode_bounded(&mut source, &..=4).unwrap();
        assert_eq!(body.unread(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_decoded_body_outlives_source() {
        let mut source = ByteBuffer::new(16);
        source.put(&[2, 0xAA, 0xBB, 9]).unwrap();
        let body = ByteBuffer::decode(&mut source).unwrap();
        assert_eq!(source.unread(), &[9]);

        drop(source);
        assert_eq!(body.references(), 1);
        assert_eq!(body.unread(), &[0xAA, 0xBB]);
    }
}

//! Encode length-prefixed binary fields.
//!
//! # Overview
//!
//! The wire representation shared by everything that stages protocol bytes in a buffer:
//! - [Write] and [EncodeSize] for values that can be serialized into any [bytes::BufMut]
//! - [Read] for values that can be deserialized from any [bytes::Buf], bounded by a
//!   configuration (for example, the largest acceptable field length)
//! - [varint] for compact unsigned integers
//! - [field] for opaque byte fields: a varint length followed by the raw body
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use stagebuf_codec::{decode, Encode};
//!
//! let payload = Bytes::from_static(b"ping");
//! let encoded = payload.encode();
//! assert_eq!(&encoded[..], b"\x04ping");
//!
//! let decoded: Bytes = decode(encoded, ..=16).unwrap();
//! assert_eq!(decoded, payload);
//! ```

pub mod codec;
pub mod error;
pub mod field;
pub mod varint;

pub use codec::{decode, Encode, EncodeSize, Read, ReadExt, Write};
pub use error::Error;

//! Self-describing value codec and protocol messages for ipcmux.
//!
//! Every value on the wire is encoded as:
//! - A 1-byte type tag (absent, string, bytes, list, other)
//! - For sized kinds, a 4-byte big-endian length or element count
//! - The payload bytes (UTF-8 text, raw bytes, nested values, or JSON text)
//!
//! A protocol message is exactly two values back to back: header, then body.

pub mod codec;
pub mod error;
pub mod message;
pub mod value;

pub use codec::{decode, decode_from, encode, encode_into, MAX_DEPTH};
pub use error::{Result, WireError};
pub use message::{Message, RemoteError, Request, RequestId, Response};
pub use value::Value;

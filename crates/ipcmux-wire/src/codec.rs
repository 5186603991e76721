use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::value::Value;

/// Tag for an absent value.
pub const TAG_ABSENT: u8 = 0;
/// Tag for a UTF-8 string.
pub const TAG_STRING: u8 = 1;
/// Tag for a raw byte blob.
pub const TAG_BYTES: u8 = 2;
/// Tag for a list of values.
pub const TAG_LIST: u8 = 3;
/// Tag for a JSON-encoded structured value.
pub const TAG_OTHER: u8 = 4;

/// Size of the big-endian length (or element count) field.
pub const LENGTH_SIZE: usize = 4;

/// Maximum list nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// Encode a value into a fresh buffer.
pub fn encode(value: &Value) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_into(value, &mut dst)?;
    Ok(dst.freeze())
}

/// Append the encoding of a value to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────────┬──────────────────────────┐
/// │ Tag (1B) │ Length (4B BE)   │ Payload                  │
/// │          │ absent: omitted  │ string: UTF-8            │
/// │          │ list: item count │ bytes: raw               │
/// │          │                  │ list: <count> values     │
/// │          │                  │ other: JSON text         │
/// └──────────┴──────────────────┴──────────────────────────┘
/// ```
pub fn encode_into(value: &Value, dst: &mut BytesMut) -> Result<()> {
    match value {
        Value::Absent => dst.put_u8(TAG_ABSENT),
        Value::String(s) => put_sized(dst, TAG_STRING, s.as_bytes())?,
        Value::Bytes(b) => put_sized(dst, TAG_BYTES, b)?,
        Value::List(items) => {
            dst.put_u8(TAG_LIST);
            dst.put_u32(checked_len(items.len())?);
            for item in items {
                encode_into(item, dst)?;
            }
        }
        Value::Other(v) => {
            let json = serde_json::to_vec(v)?;
            put_sized(dst, TAG_OTHER, &json)?;
        }
    }
    Ok(())
}

/// Decode exactly one value; trailing bytes are an error.
pub fn decode(src: &[u8]) -> Result<Value> {
    let mut cursor = src;
    let value = decode_from(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(WireError::TrailingBytes(cursor.len()));
    }
    Ok(value)
}

/// Decode one value from the front of `src`, advancing past it.
pub fn decode_from(src: &mut &[u8]) -> Result<Value> {
    decode_at_depth(src, 0)
}

fn decode_at_depth(src: &mut &[u8], depth: usize) -> Result<Value> {
    ensure(src, 1)?;
    let tag = src.get_u8();

    match tag {
        TAG_ABSENT => Ok(Value::Absent),
        TAG_STRING => {
            let payload = take_sized(src)?;
            Ok(Value::String(std::str::from_utf8(payload)?.to_owned()))
        }
        TAG_BYTES => Ok(Value::Bytes(Bytes::copy_from_slice(take_sized(src)?))),
        TAG_LIST => {
            if depth >= MAX_DEPTH {
                return Err(WireError::TooDeep { max: MAX_DEPTH });
            }
            ensure(src, LENGTH_SIZE)?;
            let count = src.get_u32() as usize;
            // Every item takes at least one byte, which bounds the preallocation.
            let mut items = Vec::with_capacity(count.min(src.len()));
            for _ in 0..count {
                items.push(decode_at_depth(src, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        TAG_OTHER => {
            let payload = take_sized(src)?;
            Ok(Value::Other(serde_json::from_slice(payload)?))
        }
        other => Err(WireError::UnknownTag(other)),
    }
}

fn put_sized(dst: &mut BytesMut, tag: u8, payload: &[u8]) -> Result<()> {
    let len = checked_len(payload.len())?;
    dst.reserve(1 + LENGTH_SIZE + payload.len());
    dst.put_u8(tag);
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

fn take_sized<'a>(src: &mut &'a [u8]) -> Result<&'a [u8]> {
    ensure(src, LENGTH_SIZE)?;
    let len = src.get_u32() as usize;
    ensure(src, len)?;
    let whole: &'a [u8] = *src;
    let (payload, rest) = whole.split_at(len);
    *src = rest;
    Ok(payload)
}

fn ensure(src: &[u8], needed: usize) -> Result<()> {
    if src.len() < needed {
        return Err(WireError::Truncated {
            needed,
            remaining: src.len(),
        });
    }
    Ok(())
}

fn checked_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| WireError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

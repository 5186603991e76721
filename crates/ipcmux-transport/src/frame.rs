use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Frame header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "IM" (0x49 0x4D).
pub const MAGIC: [u8; 2] = [0x49, 0x4D];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Configuration for byte-stream transports.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum message size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Delimits whole messages on a byte stream.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Payload          │
/// │ 0x49 0x4D    │ (4B LE)   │ (Length bytes)   │
/// │ "IM"         │           │                  │
/// └──────────────┴───────────┴─────────────────┘
/// ```
///
/// Message transports hand whole messages to the protocol layer; this
/// framing exists only because byte streams have no message boundaries.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    config: FrameConfig,
}

impl MessageCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        if src[0..2] != MAGIC {
            return Err(FrameError::InvalidMagic);
        }

        let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if payload_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.config.max_payload_size,
            });
        }

        let total = HEADER_SIZE + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        Ok(Some(src.split_to(payload_len).freeze()))
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        let max = self.config.max_payload_size.min(u32::MAX as usize);
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_slice(&MAGIC);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(payload: &'static [u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        MessageCodec::default()
            .encode(Bytes::from_static(payload), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = encode_one(b"hello, ipcmux!");
        assert_eq!(buf.len(), HEADER_SIZE + 14);

        let msg = MessageCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.as_ref(), b"hello, ipcmux!");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x49, 0x4D, 0x00][..]);
        assert!(MessageCodec::default().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = encode_one(b"hello");
        buf.truncate(HEADER_SIZE + 2);
        assert!(MessageCodec::default().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00][..]);
        let result = MessageCodec::default().decode(&mut buf);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024);

        let mut codec = MessageCodec::new(FrameConfig {
            max_payload_size: 16,
        });
        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_encode_payload_too_large() {
        let mut codec = MessageCodec::new(FrameConfig {
            max_payload_size: 4,
        });
        let mut buf = BytesMut::new();
        let result = codec.encode(Bytes::from_static(b"too long"), &mut buf);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_messages() {
        let mut buf = encode_one(b"first");
        buf.extend_from_slice(&encode_one(b"second"));

        let mut codec = MessageCodec::default();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = encode_one(b"");
        let msg = MessageCodec::default().decode(&mut buf).unwrap().unwrap();
        assert!(msg.is_empty());
    }
}

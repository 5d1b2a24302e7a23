//! Binary frame format.
//!
//! Frame layout (12 bytes header + payload):
//!
//! ```text
//! +--------------+--------------+--------------+---------------------+
//! | total_length | message_kind | subject_id   | payload (UTF-8)     |
//! |   4 bytes    |   4 bytes    |   4 bytes    | total_length - 12   |
//! +--------------+--------------+--------------+---------------------+
//! ```
//!
//! All header fields are big-endian. `subject_id` is a signed user id sent as
//! its two's-complement bit pattern, so `-1` travels as `0xFFFF_FFFF`.

use crate::error::ProtocolError;
use crate::message::MessageKind;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (4+4+4 = 12).
pub const FRAME_HEADER_SIZE: usize = 12;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length including the header.
    pub length: u32,
    /// Message kind.
    pub kind: MessageKind,
    /// User id the frame is about (sender, new login, ...).
    pub subject_id: i32,
}

impl FrameHeader {
    /// Returns the number of payload bytes that follow this header.
    ///
    /// Fails with `InvalidLength` if the declared length is shorter than the
    /// header itself, or `FrameTooLarge` past [`MAX_PAYLOAD_SIZE`].
    pub fn payload_len(&self) -> Result<usize, ProtocolError> {
        let payload_len = (self.length as usize)
            .checked_sub(FRAME_HEADER_SIZE)
            .ok_or(ProtocolError::InvalidLength(self.length))?;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(payload_len)
    }
}

/// A complete frame. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: MessageKind,
    subject_id: i32,
    payload: Bytes,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(kind: MessageKind, subject_id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            subject_id,
            payload: payload.into(),
        }
    }

    /// Assembles a frame from a decoded header and the payload read after it.
    pub fn from_parts(header: FrameHeader, payload: Bytes) -> Result<Self, ProtocolError> {
        let expected = header.payload_len()?;
        if payload.len() != expected {
            return Err(ProtocolError::InvalidLength(header.length));
        }
        Ok(Self::new(header.kind, header.subject_id, payload))
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn subject_id(&self) -> i32 {
        self.subject_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the payload as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str, ProtocolError> {
        std::str::from_utf8(&self.payload).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Total length on the wire, header included.
    pub fn length(&self) -> u32 {
        (FRAME_HEADER_SIZE + self.payload.len()) as u32
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u32(self.length());
        buf.put_u32(self.kind.code());
        buf.put_u32(self.subject_id as u32);
        buf.put_slice(&self.payload);
        buf
    }

    /// Decodes a frame from a buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at header without consuming
        let header = decode_header(&buf[..FRAME_HEADER_SIZE])?;
        let payload_len = header.payload_len()?;
        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Self::new(header.kind, header.subject_id, payload)))
    }
}

/// Encodes a frame with a text payload.
pub fn encode(kind: MessageKind, subject_id: i32, payload: &str) -> BytesMut {
    Frame::new(kind, subject_id, Bytes::copy_from_slice(payload.as_bytes())).encode()
}

/// Decodes a 12-byte header.
///
/// The length field is not validated here; callers check it with
/// [`FrameHeader::payload_len`] before reading the payload.
pub fn decode_header(mut bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() != FRAME_HEADER_SIZE {
        return Err(ProtocolError::MalformedHeader(bytes.len()));
    }

    let length = bytes.get_u32();
    let kind = MessageKind::from(bytes.get_u32());
    let subject_id = bytes.get_u32() as i32;

    Ok(FrameHeader {
        length,
        kind,
        subject_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_roundtrip() {
        let encoded = encode(MessageKind::Chat, 7, "8:hello");
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 7);

        let mut buf = encoded;
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.kind(), MessageKind::Chat);
        assert_eq!(decoded.subject_id(), 7);
        assert_eq!(decoded.payload_str().unwrap(), "8:hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_layout() {
        let encoded = encode(MessageKind::Login, 0, "alice:pw");
        assert_eq!(&encoded[0..4], &20u32.to_be_bytes());
        assert_eq!(&encoded[4..8], &1u32.to_be_bytes());
        assert_eq!(&encoded[8..12], &0u32.to_be_bytes());
        assert_eq!(&encoded[12..], b"alice:pw");
    }

    #[test]
    fn test_negative_subject_id() {
        let encoded = encode(MessageKind::LoginResponse, -1, "Login failed");
        assert_eq!(&encoded[8..12], &[0xFF, 0xFF, 0xFF, 0xFF]);

        let header = decode_header(&encoded[..FRAME_HEADER_SIZE]).unwrap();
        assert_eq!(header.subject_id, -1);
    }

    #[test]
    fn test_malformed_header() {
        let result = decode_header(&[0u8; 11]);
        assert!(matches!(result, Err(ProtocolError::MalformedHeader(11))));

        let result = decode_header(&[0u8; 13]);
        assert!(matches!(result, Err(ProtocolError::MalformedHeader(13))));
    }

    #[test]
    fn test_decode_header_does_not_validate_length() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&4u32.to_be_bytes());
        raw.extend_from_slice(&8u32.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());

        let header = decode_header(&raw).unwrap();
        assert_eq!(header.length, 4);
        assert!(matches!(
            header.payload_len(),
            Err(ProtocolError::InvalidLength(4))
        ));
    }

    #[test]
    fn test_oversized_length() {
        let header = FrameHeader {
            length: u32::MAX,
            kind: MessageKind::Chat,
            subject_id: 1,
        };
        assert!(matches!(
            header.payload_len(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(MessageKind::GetUsers, 3, Bytes::new());
        assert_eq!(frame.length(), 12);

        let mut buf = frame.encode();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let encoded = encode(MessageKind::Chat, 1, "2:partial");

        let mut buf = BytesMut::from(&encoded[..8]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&encoded[..14]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        // Nothing consumed while waiting for the rest
        assert_eq!(buf.len(), 14);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(MessageKind::Heartbeat, 1, "Pong"));
        buf.extend_from_slice(&encode(MessageKind::Chat, 2, "hi"));

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind(), MessageKind::Heartbeat);

        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind(), MessageKind::Chat);
        assert_eq!(second.payload_str().unwrap(), "hi");
    }

    #[test]
    fn test_from_parts_checks_payload_size() {
        let header = FrameHeader {
            length: 15,
            kind: MessageKind::Error,
            subject_id: 0,
        };
        assert!(Frame::from_parts(header, Bytes::from_static(b"abc")).is_ok());
        assert!(Frame::from_parts(header, Bytes::from_static(b"ab")).is_err());
    }

    #[test]
    fn test_invalid_utf8_payload() {
        let frame = Frame::new(MessageKind::Chat, 1, Bytes::from_static(&[0xC3, 0x28]));
        assert!(matches!(
            frame.payload_str(),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(kind in any::<u32>(), subject_id in any::<i32>(), payload in ".*") {
            let kind = MessageKind::from(kind);
            let mut buf = encode(kind, subject_id, &payload);
            let decoded = Frame::decode(&mut buf).unwrap().unwrap();

            prop_assert_eq!(decoded.kind(), kind);
            prop_assert_eq!(decoded.subject_id(), subject_id);
            prop_assert_eq!(decoded.payload_str().unwrap(), payload.as_str());
        }
    }
}

//! Encoder and decoder for EasyChat frames.

use crate::error::ProtocolError;
use crate::frame::{encode, Frame};
use crate::message::{ChatMessage, HistoryRequest, LoginRequest, MessageKind, RegisterRequest};
use bytes::BytesMut;

/// Builds the request frames a client sends.
pub struct Encoder;

impl Encoder {
    /// Encodes a login request. The subject id is ignored by the server.
    pub fn login(request: &LoginRequest) -> BytesMut {
        encode(MessageKind::Login, 0, &request.encode())
    }

    /// Encodes a register request.
    pub fn register(request: &RegisterRequest) -> BytesMut {
        encode(MessageKind::Register, 0, &request.encode())
    }

    /// Encodes a chat message from `sender_id`.
    pub fn chat(sender_id: i32, message: &ChatMessage) -> BytesMut {
        encode(MessageKind::Chat, sender_id, &message.encode())
    }

    /// Encodes a history request.
    pub fn history(user_id: i32, request: &HistoryRequest) -> BytesMut {
        encode(MessageKind::History, user_id, &request.encode())
    }

    /// Encodes an online users request.
    pub fn get_users(user_id: i32) -> BytesMut {
        encode(MessageKind::GetUsers, user_id, "")
    }

    /// Encodes a name lookup. The payload is the raw username.
    pub fn get_user_by_name(user_id: i32, username: &str) -> BytesMut {
        encode(MessageKind::GetUserByName, user_id, username)
    }

    /// Encodes a heartbeat.
    pub fn heartbeat(user_id: i32) -> BytesMut {
        encode(MessageKind::Heartbeat, user_id, "Ping")
    }
}

/// Incremental frame decoder for readers that receive arbitrary chunks.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

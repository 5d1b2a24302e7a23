//! # easychat-protocol
//!
//! Wire protocol implementation for EasyChat.
//!
//! This crate provides:
//! - Binary framing with a fixed 12-byte big-endian header
//! - The closed set of message kinds, tolerant of unknown values
//! - Incremental decoding for peers that read arbitrary chunks
//! - Parsers and builders for the colon/comma/pipe delimited payloads

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{decode_header, encode, Frame, FrameHeader, FRAME_HEADER_SIZE};
pub use message::{
    kind_name, ChatMessage, HistoryEntry, HistoryRequest, LoginRequest, MessageKind,
    RegisterRequest, UserEntry,
};

/// Default port for the EasyChat server.
pub const DEFAULT_PORT: u16 = 8888;

/// Maximum payload size a reader accepts (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Subject id carried by frames that have no authenticated user yet.
pub const UNAUTHENTICATED_ID: i32 = -1;

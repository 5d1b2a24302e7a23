//! Message kinds and payload sub-formats.
//!
//! Payloads are plain UTF-8 text. Fields inside a record are separated by
//! `:`, records inside a list by `,` (users) or `|` (history). Parsers split
//! on the first `:` only, so the trailing field may itself contain colons.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message kinds carried in the frame header.
///
/// Unrecognized wire values are kept as [`MessageKind::Unknown`] so newer
/// servers can add kinds without breaking older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Login,
    LoginResponse,
    Register,
    RegisterResponse,
    Chat,
    ChatResponse,
    OfflineMessage,
    Heartbeat,
    Error,
    History,
    GetUsers,
    HistoryResponse,
    GetUsersResponse,
    GetUserByName,
    GetUserByNameResponse,
    Unknown(u32),
}

impl MessageKind {
    /// Returns the wire value.
    pub fn code(&self) -> u32 {
        match self {
            MessageKind::Login => 1,
            MessageKind::LoginResponse => 2,
            MessageKind::Register => 3,
            MessageKind::RegisterResponse => 4,
            MessageKind::Chat => 5,
            MessageKind::ChatResponse => 6,
            MessageKind::OfflineMessage => 7,
            MessageKind::Heartbeat => 8,
            MessageKind::Error => 9,
            MessageKind::History => 10,
            MessageKind::GetUsers => 11,
            MessageKind::HistoryResponse => 12,
            MessageKind::GetUsersResponse => 13,
            MessageKind::GetUserByName => 14,
            MessageKind::GetUserByNameResponse => 15,
            MessageKind::Unknown(code) => *code,
        }
    }

    /// Returns whether this is a kind the client normally sends.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageKind::Login
                | MessageKind::Register
                | MessageKind::History
                | MessageKind::GetUsers
                | MessageKind::GetUserByName
        )
    }
}

impl From<u32> for MessageKind {
    fn from(code: u32) -> Self {
        match code {
            1 => MessageKind::Login,
            2 => MessageKind::LoginResponse,
            3 => MessageKind::Register,
            4 => MessageKind::RegisterResponse,
            5 => MessageKind::Chat,
            6 => MessageKind::ChatResponse,
            7 => MessageKind::OfflineMessage,
            8 => MessageKind::Heartbeat,
            9 => MessageKind::Error,
            10 => MessageKind::History,
            11 => MessageKind::GetUsers,
            12 => MessageKind::HistoryResponse,
            13 => MessageKind::GetUsersResponse,
            14 => MessageKind::GetUserByName,
            15 => MessageKind::GetUserByNameResponse,
            other => MessageKind::Unknown(other),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Login => write!(f, "LOGIN"),
            MessageKind::LoginResponse => write!(f, "LOGIN_RESP"),
            MessageKind::Register => write!(f, "REGISTER"),
            MessageKind::RegisterResponse => write!(f, "REGISTER_RESP"),
            MessageKind::Chat => write!(f, "CHAT"),
            MessageKind::ChatResponse => write!(f, "CHAT_RESP"),
            MessageKind::OfflineMessage => write!(f, "OFFLINE_MSG"),
            MessageKind::Heartbeat => write!(f, "HEARTBEAT"),
            MessageKind::Error => write!(f, "ERROR"),
            MessageKind::History => write!(f, "HISTORY"),
            MessageKind::GetUsers => write!(f, "GET_USERS"),
            MessageKind::HistoryResponse => write!(f, "HISTORY_RESP"),
            MessageKind::GetUsersResponse => write!(f, "GET_USERS_RESP"),
            MessageKind::GetUserByName => write!(f, "GET_USER_BY_NAME"),
            MessageKind::GetUserByNameResponse => write!(f, "GET_USER_BY_NAME_RESP"),
            MessageKind::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

/// Returns the display name of a raw wire kind. Never fails.
pub fn kind_name(code: u32) -> String {
    MessageKind::from(code).to_string()
}

/// Login request: `<username>:<password>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }

    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let (username, password) = payload
            .split_once(':')
            .ok_or_else(|| ProtocolError::malformed("login", "missing ':'"))?;
        Ok(Self::new(username, password))
    }
}

/// Register request: `<username>:<password>:<nickname>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// May be empty.
    pub nickname: String,
}

impl RegisterRequest {
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.username, self.password, self.nickname)
    }
}

/// Chat message.
///
/// Outbound the payload is `<receiverId>:<content>`. Inbound chat frames carry
/// the sender in the header and the content as the whole payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub receiver_id: i32,
    pub content: String,
}

impl ChatMessage {
    pub fn new(receiver_id: i32, content: impl Into<String>) -> Self {
        Self {
            receiver_id,
            content: content.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.receiver_id, self.content)
    }

    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let (id, content) = split_id("chat", payload)?;
        Ok(Self::new(id, content))
    }
}

/// History request: `<peerId>:<limit>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    pub peer_id: i32,
    pub limit: u32,
}

impl HistoryRequest {
    /// Default number of records asked for.
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn encode(&self) -> String {
        format!("{}:{}", self.peer_id, self.limit)
    }
}

/// One record of a history response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender_id: i32,
    pub content: String,
}

impl HistoryEntry {
    /// Parses `<senderId>:<content>|<senderId>:<content>|...`.
    ///
    /// Records without a numeric sender are skipped.
    pub fn parse_list(payload: &str) -> Vec<Self> {
        if payload.is_empty() {
            return Vec::new();
        }
        payload
            .split('|')
            .filter_map(|record| match split_id("history", record) {
                Ok((sender_id, content)) => Some(Self {
                    sender_id,
                    content: content.to_string(),
                }),
                Err(e) => {
                    tracing::debug!("Skipping history record {:?}: {}", record, e);
                    None
                }
            })
            .collect()
    }

    pub fn encode_list(entries: &[HistoryEntry]) -> String {
        entries
            .iter()
            .map(|e| format!("{}:{}", e.sender_id, e.content))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// A known user: `<id>:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: i32,
    pub name: String,
}

impl UserEntry {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let (id, name) = split_id("user entry", payload)?;
        Ok(Self::new(id, name))
    }

    /// Parses `<id>:<name>,<id>:<name>,...`. Malformed entries are skipped.
    pub fn parse_list(payload: &str) -> Vec<Self> {
        if payload.is_empty() {
            return Vec::new();
        }
        payload
            .split(',')
            .filter_map(|entry| match Self::parse(entry) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::debug!("Skipping user entry {:?}: {}", entry, e);
                    None
                }
            })
            .collect()
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.id, self.name)
    }

    pub fn encode_list(users: &[UserEntry]) -> String {
        users
            .iter()
            .map(UserEntry::encode)
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn split_id<'a>(format: &'static str, record: &'a str) -> Result<(i32, &'a str), ProtocolError> {
    let (id, rest) = record
        .split_once(':')
        .ok_or_else(|| ProtocolError::malformed(format, "missing ':'"))?;
    let id = id
        .trim()
        .parse::<i32>()
        .map_err(|e| ProtocolError::malformed(format, format!("bad id {:?}: {}", id, e)))?;
    Ok((id, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_roundtrip() {
        for code in 1..=15 {
            let kind = MessageKind::from(code);
            assert!(!matches!(kind, MessageKind::Unknown(_)));
            assert_eq!(kind.code(), code);
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(kind_name(1), "LOGIN");
        assert_eq!(kind_name(2), "LOGIN_RESP");
        assert_eq!(kind_name(7), "OFFLINE_MSG");
        assert_eq!(kind_name(13), "GET_USERS_RESP");
        assert_eq!(kind_name(15), "GET_USER_BY_NAME_RESP");
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(kind_name(9999), "UNKNOWN(9999)");
        assert_eq!(kind_name(0), "UNKNOWN(0)");

        let kind = MessageKind::from(9999);
        assert_eq!(kind, MessageKind::Unknown(9999));
        assert_eq!(kind.code(), 9999);
    }

    #[test]
    fn test_request_kinds() {
        assert!(MessageKind::Login.is_request());
        assert!(MessageKind::GetUserByName.is_request());
        assert!(!MessageKind::LoginResponse.is_request());
        assert!(!MessageKind::Chat.is_request());
    }

    #[test]
    fn test_login_request() {
        let req = LoginRequest::new("alice", "pw");
        assert_eq!(req.encode(), "alice:pw");

        // Password may contain colons
        let parsed = LoginRequest::parse("bob:a:b").unwrap();
        assert_eq!(parsed.username, "bob");
        assert_eq!(parsed.password, "a:b");

        assert!(LoginRequest::parse("nocolon").is_err());
    }

    #[test]
    fn test_register_request() {
        let req = RegisterRequest {
            username: "alice".into(),
            password: "pw".into(),
            nickname: String::new(),
        };
        assert_eq!(req.encode(), "alice:pw:");
    }

    #[test]
    fn test_chat_message() {
        let msg = ChatMessage::new(8, "see you at 10:30");
        assert_eq!(msg.encode(), "8:see you at 10:30");

        let parsed = ChatMessage::parse(&msg.encode()).unwrap();
        assert_eq!(parsed, msg);

        assert!(ChatMessage::parse("bob:hello").is_err());
    }

    #[test]
    fn test_history_request() {
        let req = HistoryRequest {
            peer_id: 8,
            limit: HistoryRequest::DEFAULT_LIMIT,
        };
        assert_eq!(req.encode(), "8:50");
    }

    #[test]
    fn test_history_list() {
        let entries = HistoryEntry::parse_list("7:hi|8:hello: there|garbage|9:");
        assert_eq!(
            entries,
            vec![
                HistoryEntry {
                    sender_id: 7,
                    content: "hi".into()
                },
                HistoryEntry {
                    sender_id: 8,
                    content: "hello: there".into()
                },
                HistoryEntry {
                    sender_id: 9,
                    content: String::new()
                },
            ]
        );

        assert!(HistoryEntry::parse_list("").is_empty());
        assert_eq!(HistoryEntry::encode_list(&entries[..2]), "7:hi|8:hello: there");
    }

    #[test]
    fn test_user_entry() {
        let user = UserEntry::parse("7:alice").unwrap();
        assert_eq!(user, UserEntry::new(7, "alice"));
        assert_eq!(user.encode(), "7:alice");

        assert!(UserEntry::parse("").is_err());
        assert!(UserEntry::parse("x:alice").is_err());
    }

    #[test]
    fn test_user_list() {
        let users = UserEntry::parse_list("7:alice,8:bob,oops,x:y");
        assert_eq!(users, vec![UserEntry::new(7, "alice"), UserEntry::new(8, "bob")]);
        assert_eq!(UserEntry::encode_list(&users), "7:alice,8:bob");

        assert!(UserEntry::parse_list("").is_empty());
    }

    #[test]
    fn test_user_entry_json() {
        let json = serde_json::to_string(&UserEntry::new(8, "bob")).unwrap();
        assert_eq!(json, r#"{"id":8,"name":"bob"}"#);
    }
}

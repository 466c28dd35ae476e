// src/core/protocol/message.rs

//! The application messages exchanged over a relay connection.

use crate::core::RelayError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// A message sent by a client, one variant per `type` discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Login(LoginRequest),
    Chat(ChatMessage),
    FileTransfer(FileHeader),
    ChangePassword(ChangePasswordRequest),
    ChangeName(ChangeNameRequest),
}

/// Only the discriminator, used to pick the schema for the second pass.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ClientMessage {
    /// Reads the `type` field and decodes the frame against that type's schema.
    pub fn parse(frame: &[u8]) -> Result<Self, RelayError> {
        let envelope: Envelope = serde_json::from_slice(frame)?;
        let kind = envelope
            .kind
            .ok_or_else(|| RelayError::Protocol("message has no 'type' field".to_string()))?;
        let message = match kind.as_str() {
            "login" => ClientMessage::Login(serde_json::from_slice(frame)?),
            "message" => ClientMessage::Chat(serde_json::from_slice(frame)?),
            "file_transfer" => ClientMessage::FileTransfer(serde_json::from_slice(frame)?),
            "changepwd" => ClientMessage::ChangePassword(serde_json::from_slice(frame)?),
            "changename" => ClientMessage::ChangeName(serde_json::from_slice(frame)?),
            _ => return Err(RelayError::UnknownMessageType(kind)),
        };
        Ok(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Login(_) => "login",
            ClientMessage::Chat(_) => "message",
            ClientMessage::FileTransfer(_) => "file_transfer",
            ClientMessage::ChangePassword(_) => "changepwd",
            ClientMessage::ChangeName(_) => "changename",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub pwd: String,
}

/// A chat payload. Also the shape forwarded to receivers and replayed from
/// the offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "receiveid", deserialize_with = "string_or_number")]
    pub receiver_id: String,
    #[serde(rename = "sendTime", default)]
    pub send_time: String,
    #[serde(rename = "sendid", default, deserialize_with = "string_or_number")]
    pub sender_id: String,
}

/// Header announcing a binary payload of `size` bytes that follows it on the
/// same stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub filename: String,
    #[serde(deserialize_with = "size_from_string_or_number")]
    pub size: u64,
    #[serde(rename = "sendid", default, deserialize_with = "string_or_number")]
    pub sender_id: String,
    #[serde(rename = "receiveid", deserialize_with = "string_or_number")]
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(rename = "oldpwd", default)]
    pub current_password: String,
    #[serde(rename = "newpwd")]
    pub new_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNameRequest {
    pub name: String,
}

/// One entry of the friend list sent after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: String,
    pub name: String,
    pub status: u8,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Fail,
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "login_response")]
    LoginResponse { success: bool, message: String },

    #[serde(rename = "friend_list")]
    FriendList { friends: Vec<FriendInfo> },

    #[serde(rename = "message")]
    Chat(ChatMessage),

    #[serde(rename = "file_notify")]
    FileNotify {
        filename: String,
        size: String,
        sender_id: String,
    },

    #[serde(rename = "changepwd_response")]
    ChangePasswordResponse { status: AckStatus, message: String },

    #[serde(rename = "changename_response")]
    ChangeNameResponse { status: AckStatus },
}

impl ServerMessage {
    pub fn login_ok(account_id: &str) -> Self {
        ServerMessage::LoginResponse {
            success: true,
            message: format!("id:{account_id}"),
        }
    }

    pub fn login_failed(reason: impl Into<String>) -> Self {
        ServerMessage::LoginResponse {
            success: false,
            message: reason.into(),
        }
    }

    pub fn file_notify(filename: &str, size: u64, sender_id: &str) -> Self {
        ServerMessage::FileNotify {
            filename: filename.to_string(),
            size: size.to_string(),
            sender_id: sender_id.to_string(),
        }
    }
}

/// Accepts identifiers sent either as JSON strings or as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

/// File sizes arrive as decimal strings from most clients, numbers from some.
fn size_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = string_or_number(deserializer)?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| de::Error::custom(format!("invalid file size '{raw}'")))
}

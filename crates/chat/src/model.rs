// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat wire types shared by the REST client and the realtime transport.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ChatError;

/// Server-assigned identifier. The backend emits these as numbers or strings;
/// both are held as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
            Uint(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Str(s) => Self(s),
            Raw::Int(n) => Self(n.to_string()),
            Raw::Uint(n) => Self(n.to_string()),
        })
    }
}

pub type MessageId = Id;
pub type RoomId = Id;
pub type UserId = Id;

/// A single chat message as broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(
        default,
        rename = "chat_room_id",
        alias = "room_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub room_id: Option<RoomId>,
    #[serde(rename = "user_id")]
    pub author_id: UserId,
    #[serde(rename = "user_name", default)]
    pub author_name: String,
    #[serde(rename = "message")]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A user as reported by presence snapshots and join/leave pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUser {
    #[serde(rename = "id", alias = "user_id")]
    pub user_id: UserId,
    #[serde(rename = "name", alias = "user_name", default)]
    pub display_name: String,
}

/// Body of `POST /chat/join`.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinResponse {
    pub room_id: RoomId,
}

/// Body of `GET /chat/messages`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Body of `GET /chat/online-users`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnlineUsersResponse {
    #[serde(default)]
    pub users: Vec<PresenceUser>,
}

/// Request body of `POST /chat/send-message`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub message: &'a str,
}

/// Payload of the `ChatMessageSent` broadcast.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageSentPayload {
    pub message: ChatMessage,
}

/// Payload of the `UserJoinedChat` / `UserLeftChat` broadcasts.
#[derive(Debug, Clone, Deserialize)]
pub struct PresencePayload {
    pub user: PresenceUser,
}

/// Check outgoing message text. Length is counted in characters, untrimmed.
pub fn validate_message(text: &str, max_len: usize) -> Result<(), ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::Validation("Message cannot be empty".to_owned()));
    }
    if text.chars().count() > max_len {
        return Err(ChatError::Validation(format!(
            "Message too long. Maximum {max_len} characters allowed."
        )));
    }
    Ok(())
}

/// Shorten `text` to at most `max_chars` characters for one-line previews.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;

//! Message types for the Huddle protocol.
//!
//! A [`Message`] is both the unit the hub fans out and the JSON object
//! written to every client socket. A [`ClientFrame`] is what a client sends.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Chat text published by a room member.
    Message,
    /// A member joined the room.
    Join,
    /// A member left the room.
    Leave,
}

impl MessageKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room message.
///
/// Messages are built by the server only. Fields are public for reading;
/// once a message is handed to the hub it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Display name of the author.
    pub username: String,
    /// Text payload.
    pub content: String,
    /// Target room.
    pub room: String,
    /// Server timestamp (RFC 3339, UTC, second precision).
    pub time: String,
}

impl Message {
    /// Create a message of the given kind stamped with the current server time.
    #[must_use]
    pub fn new(
        kind: MessageKind,
        room: impl Into<String>,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            username: username.into(),
            content: content.into(),
            room: room.into(),
            time: now_rfc3339(),
        }
    }

    /// Create a chat message.
    #[must_use]
    pub fn chat(
        room: impl Into<String>,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(MessageKind::Message, room, username, content)
    }

    /// Create a join notification.
    #[must_use]
    pub fn join(room: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        let content = format!("{username} joined the room");
        Self::new(MessageKind::Join, room, username, content)
    }

    /// Create a leave notification.
    #[must_use]
    pub fn leave(room: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        let content = format!("{username} left the room");
        Self::new(MessageKind::Leave, room, username, content)
    }

    /// Whether this message belongs in room history.
    ///
    /// Only chat messages are persisted; join and leave notices never are.
    #[must_use]
    pub fn is_persistable(&self) -> bool {
        self.kind == MessageKind::Message
    }
}

/// A frame sent by a client.
///
/// Only `content` is taken from the client. Anything else it sends
/// (`type`, `username`, `room`, `time`) is ignored and overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientFrame {
    /// Text payload.
    #[serde(default)]
    pub content: String,
}

impl ClientFrame {
    /// Turn this frame into a chat message for the connection's own room and name.
    #[must_use]
    pub fn into_message(self, room: &str, username: &str) -> Message {
        Message::chat(room, username, self.content)
    }
}

/// Current server time in the wire format.
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle room chat engine.
//!
//! Every frame exchanged with a client is a JSON object:
//!
//! ```json
//! {"type":"message","username":"alice","content":"hi","room":"general","time":"2024-01-01T12:00:00Z"}
//! ```
//!
//! Clients only ever send `content`; the server fills in everything else
//! before the message is fanned out to the room.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, Message};
//!
//! let message = Message::chat("general", "alice", "hi");
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.content, "hi");
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod message;
pub mod names;

pub use codec::{decode, decode_client, encode, ProtocolError};
pub use message::{ClientFrame, Message, MessageKind};
pub use names::{
    validate_room_name, validate_username, NameError, DEFAULT_ROOM, DEFAULT_USERNAME,
    MAX_ROOM_NAME_LENGTH, MAX_USERNAME_LENGTH,
};

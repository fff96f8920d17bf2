//! Room history persistence.
//!
//! The hub writes chat messages to a [`MessageStore`] and new connections
//! read recent history back from it. Stores are best-effort: a failing
//! store never stops delivery.
//!
//! Every implementation must:
//!
//! - persist only [`MessageKind::Message`](huddle_protocol::MessageKind) messages,
//!   accepting and ignoring join/leave notices;
//! - return from [`MessageStore::recent`] at most `limit` of the most recently
//!   saved messages, oldest first.

use async_trait::async_trait;
use huddle_protocol::Message;
use thiserror::Error;

pub mod memory;
pub mod noop;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
pub use noop::NoopStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis command error.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Message could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation did not complete in time.
    #[error("Store operation timed out")]
    Timeout,

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,
}

/// Recent-history persistence for rooms.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Save a message. Non-chat messages are ignored.
    async fn save(&self, message: &Message) -> Result<(), StoreError>;

    /// Load up to `limit` of the most recent messages for a room, oldest first.
    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Release backend resources.
    async fn close(&self) -> Result<(), StoreError>;

    /// Get the backend name (e.g., "memory", "redis").
    fn name(&self) -> &'static str;
}

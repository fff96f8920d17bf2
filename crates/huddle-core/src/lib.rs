//! # huddle-core
//!
//! Room registry, broadcast dispatch, and history persistence for the
//! Huddle room chat engine.
//!
//! - **Client** - One live session and its bounded outbound queue
//! - **Room** - The live member set of one named room
//! - **Hub** - Serialized actor owning the room registry and fan-out
//! - **MessageStore** - Pluggable recent-history persistence
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  broadcast  ┌─────────────┐  try_send  ┌──────────────┐
//! │ Inbound pump│────────────▶│     Hub     │───────────▶│Outbound queue│
//! └─────────────┘             └─────────────┘            └──────────────┘
//!                                    │
//!                                    ▼
//!                             ┌─────────────┐
//!                             │MessageStore │
//!                             └─────────────┘
//! ```

pub mod client;
pub mod hub;
pub mod room;
pub mod store;

pub use client::{Client, ClientId, DeliveryError};
pub use hub::{Hub, HubConfig, HubError, HubEvent, HubHandle, HubStats, Registry, RoomSummary};
pub use room::Room;
pub use store::{MemoryStore, MessageStore, NoopStore, StoreError};

#[cfg(feature = "redis")]
pub use store::RedisStore;

pub use huddle_protocol::{Message, MessageKind};

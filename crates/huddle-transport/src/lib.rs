//! # huddle-transport
//!
//! Connection plumbing for the Huddle room chat engine.
//!
//! A connection is split into a [`FrameReader`] and a [`FrameWriter`].
//! A [`Session`] drives both halves against the hub:
//!
//! - the **outbound pump** writes queued frames and heartbeats,
//! - the **inbound pump** turns client frames into room broadcasts.
//!
//! ```rust,ignore
//! use huddle_transport::{websocket, PumpSettings, Session};
//!
//! async fn on_upgrade(socket: WebSocket, hub: HubHandle) {
//!     let (reader, writer) = websocket::split(socket);
//!     Session::new(hub, "general", "alice", PumpSettings::default())
//!         .run(reader, writer)
//!         .await;
//! }
//! ```

pub mod pump;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use pump::{inbound_pump, outbound_pump, PumpCounters, PumpSettings, Session, SessionStats};
pub use traits::{FrameReader, FrameWriter, Inbound, TransportError};

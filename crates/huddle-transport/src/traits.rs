//! Connection traits for Huddle.
//!
//! A connection is split into a reader and a writer so the two pumps can
//! run concurrently. The outbound pump is the only user of the writer.

use async_trait::async_trait;
use bytes::Bytes;
use huddle_core::HubError;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No frame arrived or a write did not finish before its deadline.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The hub is no longer running.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

/// A frame read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text or binary payload.
    Data(Bytes),
    /// A ping from the peer.
    Ping,
    /// A pong answering one of our pings.
    Pong,
    /// The peer started the closing handshake.
    Close,
}

/// The read half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` when the stream has ended.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// The write half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a pre-encoded text frame.
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a heartbeat ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame.
    async fn close(&mut self) -> Result<(), TransportError>;
}

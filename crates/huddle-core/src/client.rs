//! Connected clients.
//!
//! A [`Client`] is the hub's view of one live session: who it is, which
//! room it sits in, and the sending half of its outbound queue.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// A unique client identifier.
pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique client ID.
#[must_use]
pub(crate) fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The outbound queue is at capacity.
    #[error("Outbound queue full")]
    Full,

    /// The outbound pump has gone away.
    #[error("Outbound queue closed")]
    Closed,
}

/// One live session.
///
/// The client owns the only sender of its outbound queue. Dropping the
/// client (which the hub does when it removes it from its room) closes
/// the queue, which is what tells the outbound pump to shut down.
pub struct Client {
    id: ClientId,
    room: String,
    username: String,
    outbound: mpsc::Sender<Bytes>,
}

impl Client {
    /// Create a client with a fresh ID and an outbound queue of `capacity` frames.
    ///
    /// Returns the client and the receiving half of its queue.
    #[must_use]
    pub fn new(
        room: impl Into<String>,
        username: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let client = Self {
            id: next_client_id(),
            room: room.into(),
            username: username.into(),
            outbound,
        };
        (client, rx)
    }

    /// Get the client ID.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Get the room this client belongs to.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Get the display name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Full`] if the queue is at capacity, or
    /// [`DeliveryError::Closed`] if the receiver was dropped.
    pub fn try_deliver(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("room", &self.room)
            .field("username", &self.username)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_client_ids() {
        let (a, _rx_a) = Client::new("general", "alice", 4);
        let (b, _rx_b) = Client::new("general", "bob", 4);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.room(), "general");
        assert_eq!(b.username(), "bob");
    }

    #[test]
    fn test_try_deliver_full_and_closed() {
        let (client, mut rx) = Client::new("general", "alice", 1);

        assert!(client.try_deliver(Bytes::from_static(b"1")).is_ok());
        assert_eq!(
            client.try_deliver(Bytes::from_static(b"2")),
            Err(DeliveryError::Full)
        );

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"1"));
        drop(rx);
        assert_eq!(
            client.try_deliver(Bytes::from_static(b"3")),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn test_dropping_client_closes_queue() {
        let (client, mut rx) = Client::new("general", "alice", 4);
        client.try_deliver(Bytes::from_static(b"last")).unwrap();
        drop(client);

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"last"));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}

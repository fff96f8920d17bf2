//! Room abstraction for Huddle.
//!
//! A room is a name plus the clients currently in it. It has no identity
//! beyond that and exists only while it has members.

use crate::client::{Client, ClientId, DeliveryError};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, trace};

/// The live member set of one room.
#[derive(Debug)]
pub struct Room {
    /// Room name.
    name: String,
    /// Members indexed by client ID.
    members: HashMap<ClientId, Client>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add a client to the room.
    pub fn insert(&mut self, client: Client) {
        debug!(
            room = %self.name,
            client = client.id(),
            username = %client.username(),
            "Client joined room"
        );
        self.members.insert(client.id(), client);
    }

    /// Remove a client from the room.
    ///
    /// Returns the removed client, if it was a member. Dropping the
    /// returned value closes the client's outbound queue.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let client = self.members.remove(&id);
        if client.is_some() {
            debug!(room = %self.name, client = id, "Client left room");
        }
        client
    }

    /// Queue a frame for every member without blocking.
    ///
    /// Returns the members that could not take the frame.
    pub fn fan_out(&self, frame: &Bytes) -> Vec<(ClientId, DeliveryError)> {
        trace!(room = %self.name, members = self.members.len(), "Fanning out frame");
        self.members
            .values()
            .filter_map(|client| {
                client
                    .try_deliver(frame.clone())
                    .err()
                    .map(|e| (client.id(), e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_creation() {
        let room = Room::new("general");
        assert_eq!(room.name(), "general");
        assert_eq!(room.member_count(), 0);
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_insert_remove() {
        let mut room = Room::new("general");
        let (alice, _rx1) = Client::new("general", "alice", 4);
        let (bob, _rx2) = Client::new("general", "bob", 4);
        let (alice_id, bob_id) = (alice.id(), bob.id());

        room.insert(alice);
        room.insert(bob);
        assert_eq!(room.member_count(), 2);

        let removed = room.remove(alice_id).unwrap();
        assert_eq!(removed.username(), "alice");
        assert_eq!(room.member_count(), 1);

        // Removing a non-member
        assert!(room.remove(alice_id).is_none());

        assert!(room.remove(bob_id).is_some());
        assert!(room.is_empty());
    }

    #[test]
    fn test_fan_out_reports_full_queues() {
        let mut room = Room::new("general");
        let (fast, mut fast_rx) = Client::new("general", "fast", 8);
        let (slow, _slow_rx) = Client::new("general", "slow", 1);
        let slow_id = slow.id();
        room.insert(fast);
        room.insert(slow);

        assert!(room.fan_out(&Bytes::from_static(b"one")).is_empty());
        let failed = room.fan_out(&Bytes::from_static(b"two"));
        assert_eq!(failed, vec![(slow_id, DeliveryError::Full)]);

        assert_eq!(fast_rx.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(fast_rx.try_recv().unwrap(), Bytes::from_static(b"two"));
    }
}

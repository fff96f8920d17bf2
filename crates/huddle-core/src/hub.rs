//! The room hub.
//!
//! A single task owns every mutation of the room registry. Sessions talk to
//! it through a [`HubHandle`], which queues [`HubEvent`]s on one bounded
//! intake channel; the hub applies them one at a time, in arrival order.
//! Chat messages are handed to a separate persistence writer so a slow
//! store never holds up delivery.

use crate::client::{Client, ClientId};
use crate::room::Room;
use crate::store::MessageStore;
use huddle_protocol::{codec, Message};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The hub loop has stopped.
    #[error("Hub is closed")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the intake queue shared by all sessions.
    pub intake_capacity: usize,
    /// Capacity of the queue feeding the persistence writer.
    pub persistence_capacity: usize,
    /// Deadline for a single store save.
    pub save_timeout: Duration,
    /// Deadline for loading room history.
    pub load_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 1024,
            persistence_capacity: 1024,
            save_timeout: Duration::from_secs(2),
            load_timeout: Duration::from_secs(5),
        }
    }
}

/// An event processed by the hub loop.
#[derive(Debug)]
pub enum HubEvent {
    /// Add a client to its room.
    Register(Client),
    /// Remove a client from a room, if it is still there.
    Unregister {
        /// Client to remove.
        id: ClientId,
        /// Room the client joined.
        room: String,
    },
    /// Deliver a message to every member of its room.
    Broadcast(Message),
}

/// A room name and its current size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    /// Room name.
    pub room: String,
    /// Number of members.
    pub members: usize,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of live rooms.
    pub rooms: usize,
    /// Number of connected clients.
    pub clients: usize,
    /// Messages fanned out since start.
    pub broadcasts: u64,
    /// Clients evicted because their queue was full or closed.
    pub evictions: u64,
    /// Messages skipped by persistence because its queue was full.
    pub persistence_dropped: u64,
    /// Saves that failed or timed out.
    pub persistence_failures: u64,
}

/// The room registry.
///
/// Only the hub loop writes to it. The lock lets handles read sizes
/// without going through the intake queue.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: RwLock<HashMap<String, Room>>,
    broadcasts: AtomicU64,
    evictions: AtomicU64,
    persistence_dropped: AtomicU64,
    persistence_failures: AtomicU64,
}

impl Registry {
    /// Get the number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Get the number of members in a room (zero if it does not exist).
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.read().get(room).map_or(0, Room::member_count)
    }

    /// Get the total number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.rooms.read().values().map(Room::member_count).sum()
    }

    /// List live rooms, sorted by name.
    #[must_use]
    pub fn rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .read()
            .values()
            .map(|room| RoomSummary {
                room: room.name().to_string(),
                members: room.member_count(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room.cmp(&b.room));
        rooms
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let (rooms, clients) = {
            let rooms = self.rooms.read();
            (rooms.len(), rooms.values().map(Room::member_count).sum())
        };
        HubStats {
            rooms,
            clients,
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            persistence_dropped: self.persistence_dropped.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// The hub loop.
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    registry: Arc<Registry>,
    store: Arc<dyn MessageStore>,
    persist_tx: mpsc::Sender<Message>,
    persist_rx: Option<mpsc::Receiver<Message>>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    ///
    /// Nothing happens until [`Hub::run`] is polled.
    #[must_use]
    pub fn new(config: HubConfig, store: Arc<dyn MessageStore>) -> (Self, HubHandle) {
        let (events_tx, events) = mpsc::channel(config.intake_capacity.max(1));
        let (persist_tx, persist_rx) = mpsc::channel(config.persistence_capacity.max(1));
        let registry = Arc::new(Registry::default());

        let handle = HubHandle {
            events: events_tx,
            registry: Arc::clone(&registry),
            store: Arc::clone(&store),
            load_timeout: config.load_timeout,
        };
        let hub = Self {
            events,
            registry,
            store,
            persist_tx,
            persist_rx: Some(persist_rx),
            config,
        };
        (hub, handle)
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        info!(store = self.store.name(), "Hub started");

        if let Some(rx) = self.persist_rx.take() {
            tokio::spawn(persistence_writer(
                rx,
                Arc::clone(&self.store),
                Arc::clone(&self.registry),
                self.config.save_timeout,
            ));
        }

        while let Some(event) = self.events.recv().await {
            self.apply(event);
        }

        info!("Hub stopped");
    }

    /// Apply one event to the registry.
    pub fn apply(&self, event: HubEvent) {
        match event {
            HubEvent::Register(client) => self.register(client),
            HubEvent::Unregister { id, room } => self.unregister(id, &room),
            HubEvent::Broadcast(message) => self.broadcast(message),
        }
    }

    fn register(&self, client: Client) {
        let mut rooms = self.registry.rooms.write();
        let room = rooms.entry(client.room().to_string()).or_insert_with(|| {
            debug!(room = %client.room(), "Creating room");
            Room::new(client.room())
        });
        room.insert(client);
    }

    fn unregister(&self, id: ClientId, room_name: &str) {
        let mut rooms = self.registry.rooms.write();
        let Some(room) = rooms.get_mut(room_name) else {
            trace!(room = %room_name, client = id, "Unregister for unknown room");
            return;
        };
        if room.remove(id).is_none() {
            trace!(room = %room_name, client = id, "Client already removed");
        }
        if room.is_empty() {
            rooms.remove(room_name);
            debug!(room = %room_name, "Deleted empty room");
        }
    }

    fn broadcast(&self, message: Message) {
        if message.is_persistable() {
            self.queue_persistence(message.clone());
        }

        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = %message.room, error = %e, "Failed to encode message");
                return;
            }
        };
        self.registry.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut rooms = self.registry.rooms.write();
        let Some(room) = rooms.get_mut(&message.room) else {
            trace!(room = %message.room, "Broadcast to room with no members");
            return;
        };

        for (id, reason) in room.fan_out(&frame) {
            room.remove(id);
            self.registry.evictions.fetch_add(1, Ordering::Relaxed);
            warn!(room = %message.room, client = id, reason = %reason, "Evicted client");
        }

        if room.is_empty() {
            rooms.remove(&message.room);
            debug!(room = %message.room, "Deleted empty room");
        }
    }

    fn queue_persistence(&self, message: Message) {
        if let Err(e) = self.persist_tx.try_send(message) {
            self.registry
                .persistence_dropped
                .fetch_add(1, Ordering::Relaxed);
            let room = match &e {
                mpsc::error::TrySendError::Full(m) | mpsc::error::TrySendError::Closed(m) => {
                    m.room.as_str()
                }
            };
            warn!(room = %room, "Persistence queue unavailable, message not saved");
        }
    }
}

async fn persistence_writer(
    mut rx: mpsc::Receiver<Message>,
    store: Arc<dyn MessageStore>,
    registry: Arc<Registry>,
    save_timeout: Duration,
) {
    while let Some(message) = rx.recv().await {
        match timeout(save_timeout, store.save(&message)).await {
            Ok(Ok(())) => trace!(room = %message.room, "Persisted message"),
            Ok(Err(e)) => {
                registry.record_persistence_failure();
                warn!(room = %message.room, error = %e, "Failed to persist message");
            }
            Err(_) => {
                registry.record_persistence_failure();
                warn!(
                    room = %message.room,
                    timeout = ?save_timeout,
                    "Persisting message timed out"
                );
            }
        }
    }
    debug!("Persistence writer stopped");
}

/// A cloneable handle to the hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    registry: Arc<Registry>,
    store: Arc<dyn MessageStore>,
    load_timeout: Duration,
}

impl HubHandle {
    /// Create a hub, spawn its loop on the current runtime, and return the handle.
    #[must_use]
    pub fn spawn(config: HubConfig, store: Arc<dyn MessageStore>) -> Self {
        let (hub, handle) = Hub::new(config, store);
        tokio::spawn(hub.run());
        handle
    }

    /// Add a client to its room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.send(HubEvent::Register(client)).await
    }

    /// Remove a client from a room. Removing a client that was already
    /// evicted is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn unregister(&self, id: ClientId, room: impl Into<String>) -> Result<(), HubError> {
        self.send(HubEvent::Unregister {
            id,
            room: room.into(),
        })
        .await
    }

    /// Deliver a message to its room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn broadcast(&self, message: Message) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast(message)).await
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }

    /// Load up to `limit` recent messages for a room, oldest first.
    ///
    /// Store errors and timeouts are logged and yield an empty history.
    pub async fn history(&self, room: &str, limit: usize) -> Vec<Message> {
        if limit == 0 {
            return Vec::new();
        }
        match timeout(self.load_timeout, self.store.recent(room, limit)).await {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                warn!(room = %room, error = %e, "Failed to load history");
                Vec::new()
            }
            Err(_) => {
                warn!(room = %room, "Loading history timed out");
                Vec::new()
            }
        }
    }

    /// Get the number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.registry.room_count()
    }

    /// Get the number of members in a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.registry.member_count(room)
    }

    /// Get the total number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.registry.client_count()
    }

    /// List live rooms, sorted by name.
    #[must_use]
    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.registry.rooms()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.registry.stats()
    }

    /// Get the store backing room history.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("store", &self.store.name())
            .field("load_timeout", &self.load_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NoopStore, StoreError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use huddle_protocol::{codec::decode, MessageKind};
    use tokio::sync::mpsc::error::TryRecvError;

    fn hub() -> Hub {
        Hub::new(HubConfig::default(), Arc::new(NoopStore::new())).0
    }

    fn assert_registry_consistent(registry: &Registry) {
        for (name, room) in registry.rooms.read().iter() {
            assert!(!room.is_empty(), "room {name} is empty but registered");
            assert_eq!(room.name(), name);
        }
    }

    fn register(
        hub: &Hub,
        room: &str,
        username: &str,
        capacity: usize,
    ) -> (ClientId, mpsc::Receiver<Bytes>) {
        let (client, rx) = Client::new(room, username, capacity);
        let id = client.id();
        hub.apply(HubEvent::Register(client));
        assert_registry_consistent(hub.registry());
        (id, rx)
    }

    fn unregister(hub: &Hub, id: ClientId, room: &str) {
        hub.apply(HubEvent::Unregister {
            id,
            room: room.to_string(),
        });
    }

    fn say(hub: &Hub, room: &str, content: impl Into<String>) {
        hub.apply(HubEvent::Broadcast(Message::chat(room, "alice", content)));
    }

    fn recv(rx: &mut mpsc::Receiver<Bytes>) -> Message {
        decode(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_register_and_unregister() {
        let hub = hub();
        let (alice, _rx1) = register(&hub, "general", "alice", 8);
        let (bob, _rx2) = register(&hub, "general", "bob", 8);
        let (_carol, _rx3) = register(&hub, "random", "carol", 8);

        assert_eq!(hub.registry().room_count(), 2);
        assert_eq!(hub.registry().member_count("general"), 2);
        assert_eq!(hub.registry().client_count(), 3);

        unregister(&hub, alice, "general");
        assert_registry_consistent(hub.registry());
        assert_eq!(hub.registry().member_count("general"), 1);

        unregister(&hub, bob, "general");
        assert_registry_consistent(hub.registry());
        assert_eq!(hub.registry().member_count("general"), 0);
        assert_eq!(hub.registry().room_count(), 1);
    }

    #[test]
    fn test_unregister_closes_queue_once() {
        let hub = hub();
        let (alice, mut rx) = register(&hub, "general", "alice", 8);

        unregister(&hub, alice, "general");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));

        // Unregistering again is a no-op
        unregister(&hub, alice, "general");
        unregister(&hub, alice, "elsewhere");
        assert_registry_consistent(hub.registry());
        assert_eq!(hub.registry().room_count(), 0);
    }

    #[test]
    fn test_broadcast_reaches_room_members_only() {
        let hub = hub();
        let (_alice, mut alice_rx) = register(&hub, "general", "alice", 8);
        let (_bob, mut bob_rx) = register(&hub, "general", "bob", 8);
        let (_carol, mut carol_rx) = register(&hub, "random", "carol", 8);

        say(&hub, "general", "hello");

        let to_alice = recv(&mut alice_rx);
        let to_bob = recv(&mut bob_rx);
        assert_eq!(to_alice, to_bob);
        assert_eq!(to_alice.content, "hello");
        assert_eq!(to_alice.username, "alice");
        assert!(matches!(carol_rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(hub.registry().stats().broadcasts, 1);
    }

    #[test]
    fn test_broadcast_to_empty_room_is_dropped() {
        let hub = hub();
        say(&hub, "nobody", "hello?");
        assert_eq!(hub.registry().room_count(), 0);
    }

    #[test]
    fn test_broadcast_order_is_preserved() {
        let hub = hub();
        let (_alice, mut alice_rx) = register(&hub, "general", "alice", 16);
        let (_bob, mut bob_rx) = register(&hub, "general", "bob", 16);

        for i in 0..10 {
            say(&hub, "general", i.to_string());
        }

        for rx in [&mut alice_rx, &mut bob_rx] {
            let contents: Vec<String> = (0..10).map(|_| recv(rx).content).collect();
            let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
            assert_eq!(contents, expected);
        }
    }

    #[test]
    fn test_slow_consumer_is_evicted() {
        let hub = hub();
        let (_fast, mut fast_rx) = register(&hub, "general", "fast", 8);
        let (slow, mut slow_rx) = register(&hub, "general", "slow", 1);

        say(&hub, "general", "one");
        say(&hub, "general", "two");
        assert_registry_consistent(hub.registry());

        // The slow client keeps what it had queued, then sees its queue close
        assert_eq!(recv(&mut slow_rx).content, "one");
        assert!(matches!(
            slow_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        ));

        assert_eq!(recv(&mut fast_rx).content, "one");
        assert_eq!(recv(&mut fast_rx).content, "two");

        let stats = hub.registry().stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.clients, 1);

        // A late unregister for the evicted client changes nothing
        unregister(&hub, slow, "general");
        assert_eq!(hub.registry().member_count("general"), 1);
    }

    #[test]
    fn test_evicting_last_member_deletes_room() {
        let hub = hub();
        let (_alice, rx) = register(&hub, "general", "alice", 8);
        drop(rx);

        say(&hub, "general", "anyone?");
        assert_registry_consistent(hub.registry());
        assert_eq!(hub.registry().room_count(), 0);
        assert_eq!(hub.registry().stats().evictions, 1);
    }

    #[test]
    fn test_rooms_sorted_by_name() {
        let hub = hub();
        let _a = register(&hub, "zeta", "a", 4);
        let _b = register(&hub, "alpha", "b", 4);
        let _c = register(&hub, "alpha", "c", 4);

        assert_eq!(
            hub.registry().rooms(),
            vec![
                RoomSummary {
                    room: "alpha".into(),
                    members: 2,
                },
                RoomSummary {
                    room: "zeta".into(),
                    members: 1,
                },
            ]
        );
    }

    #[test]
    fn test_persistence_queue_overflow_is_counted() {
        let config = HubConfig {
            persistence_capacity: 1,
            ..HubConfig::default()
        };
        let (hub, _handle) = Hub::new(config, Arc::new(NoopStore::new()));
        let (_alice, mut rx) = register(&hub, "general", "alice", 8);

        say(&hub, "general", "one");
        say(&hub, "general", "two");
        // Join notices never reach the persistence queue
        hub.apply(HubEvent::Broadcast(Message::join("general", "bob")));

        assert_eq!(hub.registry().stats().persistence_dropped, 1);
        // Delivery is unaffected
        assert_eq!(recv(&mut rx).content, "one");
        assert_eq!(recv(&mut rx).content, "two");
        assert_eq!(recv(&mut rx).kind, MessageKind::Join);
    }

    #[tokio::test]
    async fn test_handle_round_trip_and_persistence() {
        let store = Arc::new(MemoryStore::new(100, Duration::from_secs(3600)));
        let handle = HubHandle::spawn(HubConfig::default(), store.clone());

        let (client, mut rx) = Client::new("general", "alice", 8);
        let id = client.id();
        handle.register(client).await.unwrap();
        for message in [
            Message::join("general", "alice"),
            Message::chat("general", "alice", "hi"),
        ] {
            handle.broadcast(message).await.unwrap();
        }

        let joined = decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(joined.kind, MessageKind::Join);
        let chat = decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(chat.content, "hi");
        assert_eq!(handle.member_count("general"), 1);

        // Persistence happens on its own task
        for _ in 0..100 {
            if store.stored_count("general") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let history = handle.history("general", 50).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");

        handle.unregister(id, "general").await.unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.room_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_fails_when_hub_is_gone() {
        let (hub, handle) = Hub::new(HubConfig::default(), Arc::new(NoopStore::new()));
        drop(hub);

        let message = Message::chat("general", "alice", "hi");
        assert_eq!(handle.broadcast(message).await, Err(HubError::Closed));
    }

    struct StalledStore;

    #[async_trait]
    impl MessageStore for StalledStore {
        async fn save(&self, _message: &Message) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn recent(&self, _room: &str, _limit: usize) -> Result<Vec<Message>, StoreError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_does_not_block_delivery() {
        let handle = HubHandle::spawn(HubConfig::default(), Arc::new(StalledStore));

        // History load gives up after the load timeout
        assert!(handle.history("general", 50).await.is_empty());

        let (client, mut rx) = Client::new("general", "alice", 8);
        handle.register(client).await.unwrap();
        for i in 0..3 {
            let message = Message::chat("general", "alice", i.to_string());
            handle.broadcast(message).await.unwrap();
        }
        for i in 0..3 {
            let message = decode(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(message.content, i.to_string());
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.stats().persistence_failures >= 1);
    }
}

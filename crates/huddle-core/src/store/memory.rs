//! In-process capped history store.
//!
//! Keeps at most `max_per_room` messages per room and forgets messages
//! older than `ttl`. Expired messages are dropped when a room is read or
//! written, and rooms with no live messages are forgotten by a background
//! sweep. Nothing survives a restart.

use super::{MessageStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use huddle_protocol::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct StoredMessage {
    saved_at: Instant,
    message: Message,
}

/// A capped, TTL'd in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    /// Per-room history, oldest at the front.
    rooms: DashMap<String, VecDeque<StoredMessage>>,
    max_per_room: usize,
    ttl: Duration,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a store keeping `max_per_room` messages per room for at most `ttl`.
    #[must_use]
    pub fn new(max_per_room: usize, ttl: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            max_per_room,
            ttl,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live messages held for a room.
    #[must_use]
    pub fn stored_count(&self, room: &str) -> usize {
        let now = Instant::now();
        let Some(history) = self.rooms.get(room) else {
            return 0;
        };
        history.iter().filter(|m| self.is_fresh(m, now)).count()
    }

    /// Number of rooms with an entry, live or not.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn is_fresh(&self, stored: &StoredMessage, now: Instant) -> bool {
        now.duration_since(stored.saved_at) <= self.ttl
    }

    /// Drop expired messages from the front of a room's history.
    fn prune(&self, history: &mut VecDeque<StoredMessage>, now: Instant) {
        while history
            .front()
            .is_some_and(|oldest| !self.is_fresh(oldest, now))
        {
            history.pop_front();
        }
    }

    /// Drop expired messages everywhere and forget rooms left empty.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.rooms.len();
        self.rooms.retain(|_, history| {
            self.prune(history, now);
            !history.is_empty()
        });
        let removed = before.saturating_sub(self.rooms.len());
        if removed > 0 {
            debug!(removed, remaining = self.rooms.len(), "Swept expired rooms");
        }
    }

    /// Spawn the background sweep, running once per `ttl`.
    ///
    /// The task holds a weak reference and ends once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let period = self.ttl.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                if store.closed.load(Ordering::SeqCst) {
                    return;
                }
                store.sweep();
            }
        })
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save(&self, message: &Message) -> Result<(), StoreError> {
        if !message.is_persistable() {
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }

        let now = Instant::now();
        let mut history = self.rooms.entry(message.room.clone()).or_default();
        self.prune(&mut history, now);

        history.push_back(StoredMessage {
            saved_at: now,
            message: message.clone(),
        });
        while history.len() > self.max_per_room {
            history.pop_front();
        }

        trace!(room = %message.room, stored = history.len(), "Saved message");
        Ok(())
    }

    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Instant::now();
        let recent: Vec<Message> = {
            let Some(mut history) = self.rooms.get_mut(room) else {
                return Ok(Vec::new());
            };
            self.prune(&mut history, now);
            let skip = history.len().saturating_sub(limit);
            history
                .iter()
                .skip(skip)
                .map(|stored| stored.message.clone())
                .collect()
        };

        if recent.is_empty() {
            self.rooms.remove_if(room, |_, history| history.is_empty());
        }
        Ok(recent)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        self.rooms.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(room: &str, content: &str) -> Message {
        Message::chat(room, "alice", content)
    }

    #[tokio::test]
    async fn test_recent_is_oldest_first_and_limited() {
        let store = MemoryStore::new(100, Duration::from_secs(3600));
        for i in 0..5 {
            store.save(&chat("general", &i.to_string())).await.unwrap();
        }

        let recent = store.recent("general", 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);

        assert_eq!(store.recent("general", 10).await.unwrap().len(), 5);
        assert!(store.recent("general", 0).await.unwrap().is_empty());
        assert!(store.recent("elsewhere", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() {
        let store = MemoryStore::new(3, Duration::from_secs(3600));
        for i in 0..5 {
            store.save(&chat("general", &i.to_string())).await.unwrap();
        }

        assert_eq!(store.stored_count("general"), 3);
        let recent = store.recent("general", 10).await.unwrap();
        assert_eq!(recent.first().unwrap().content, "2");
        assert_eq!(recent.last().unwrap().content, "4");
    }

    #[tokio::test]
    async fn test_join_and_leave_are_not_persisted() {
        let store = MemoryStore::new(10, Duration::from_secs(3600));
        store.save(&Message::join("general", "bob")).await.unwrap();
        store.save(&chat("general", "hi")).await.unwrap();
        store.save(&Message::leave("general", "bob")).await.unwrap();

        let recent = store.recent("general", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent.iter().all(Message::is_persistable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_messages() {
        let store = MemoryStore::new(10, Duration::from_secs(60));
        store.save(&chat("general", "old")).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        store.save(&chat("general", "new")).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let recent = store.recent("general", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_rooms_are_forgotten() {
        let store = MemoryStore::new(10, Duration::from_secs(60));
        for i in 0..100 {
            store.save(&chat(&format!("room-{i}"), "hi")).await.unwrap();
        }
        assert_eq!(store.room_count(), 100);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(store.recent("room-0", 10).await.unwrap().is_empty());
        assert_eq!(store.room_count(), 99);

        store.save(&chat("fresh", "still here")).await.unwrap();
        store.sweep();
        assert_eq!(store.room_count(), 1);
        assert_eq!(store.stored_count("fresh"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_in_background() {
        let store = Arc::new(MemoryStore::new(10, Duration::from_secs(60)));
        store.save(&chat("general", "hi")).await.unwrap();
        let sweeper = store.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(store.room_count(), 0);

        drop(store);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStore::new(10, Duration::from_secs(60));
        store.close().await.unwrap();
        assert!(matches!(
            store.save(&chat("general", "hi")).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            store.recent("general", 1).await,
            Err(StoreError::Closed)
        ));
    }
}

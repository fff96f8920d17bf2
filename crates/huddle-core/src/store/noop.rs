//! Store used when no persistence backend is configured.

use super::{MessageStore, StoreError};
use async_trait::async_trait;
use huddle_protocol::Message;

/// A store that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl NoopStore {
    /// Create a new no-op store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageStore for NoopStore {
    async fn save(&self, _message: &Message) -> Result<(), StoreError> {
        Ok(())
    }

    async fn recent(&self, _room: &str, _limit: usize) -> Result<Vec<Message>, StoreError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

//! History store construction.

use crate::config::{StoreBackend, StoreConfig};
use huddle_core::{MemoryStore, MessageStore, NoopStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Build the configured store, falling back to [`NoopStore`] if the backend
/// cannot be reached.
pub async fn build_store(config: &StoreConfig) -> Arc<dyn MessageStore> {
    let store: Arc<dyn MessageStore> = match config.effective_backend() {
        StoreBackend::None => Arc::new(NoopStore::new()),
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new(
                config.max_messages_per_room,
                config.ttl(),
            ));
            // Ends on its own once the store is dropped or closed.
            store.spawn_sweeper();
            store
        }
        StoreBackend::Redis => connect_redis(config).await,
    };

    info!(
        backend = store.name(),
        max_per_room = config.max_messages_per_room,
        ttl_hours = config.ttl_hours,
        "History store ready"
    );
    store
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &StoreConfig) -> Arc<dyn MessageStore> {
    let Some(url) = config.redis_url.as_deref() else {
        warn!("Redis backend selected without a URL, history disabled");
        return Arc::new(NoopStore::new());
    };

    match huddle_core::RedisStore::connect(url, config.ttl(), config.max_messages_per_room).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Failed to connect to Redis, history disabled");
            Arc::new(NoopStore::new())
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &StoreConfig) -> Arc<dyn MessageStore> {
    warn!("Built without Redis support, history disabled");
    Arc::new(NoopStore::new())
}

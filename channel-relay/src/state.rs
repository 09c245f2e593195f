use crate::types::{DocumentStore, ItemId, Result};
use interfaces::state::{load_document, save_document};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const POSITIONS_KEY: &str = "positions";

/// Durable `channel -> last classified item id` map.
///
/// Every mutation is written through to the document store before the
/// in-memory mirror changes, so a failed write never advances a position.
pub struct PositionStore {
    store: Arc<dyn DocumentStore>,
    positions: RwLock<BTreeMap<String, ItemId>>,
}

impl PositionStore {
    pub async fn open(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let positions: BTreeMap<String, ItemId> = load_document(store.as_ref(), POSITIONS_KEY)
            .await?
            .unwrap_or_default();

        info!("Loaded {} stored channel positions", positions.len());

        Ok(Self {
            store,
            positions: RwLock::new(positions),
        })
    }

    /// `None` means the channel was never polled.
    pub async fn get(&self, channel: &str) -> Option<ItemId> {
        self.positions.read().await.get(channel).copied()
    }

    pub async fn set(&self, channel: &str, id: ItemId) -> Result<()> {
        // Writers are serialized by the lock, so the whole document never loses an update
        let mut positions = self.positions.write().await;
        if positions.get(channel) == Some(&id) {
            return Ok(());
        }

        let mut next = positions.clone();
        next.insert(channel.to_string(), id);
        save_document(self.store.as_ref(), POSITIONS_KEY, &next).await?;
        *positions = next;

        debug!("Stored position {} for {}", id, channel);
        Ok(())
    }

    /// Forget a channel; the next poll treats it as never seen. Returns whether it existed.
    pub async fn remove(&self, channel: &str) -> Result<bool> {
        let mut positions = self.positions.write().await;
        if !positions.contains_key(channel) {
            return Ok(false);
        }

        let mut next = positions.clone();
        next.remove(channel);
        save_document(self.store.as_ref(), POSITIONS_KEY, &next).await?;
        *positions = next;

        info!("Removed stored position for {}", channel);
        Ok(true)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ItemId> {
        self.positions.read().await.clone()
    }
}

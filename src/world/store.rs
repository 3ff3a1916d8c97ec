use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{BlockData, DimensionId};
use crate::error::ChunkError;

/// Callback fired when a chunk's data changes. May be invoked from any thread.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Identifies one registered change callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Vertical extent of a dimension in blocks. `max_y` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalBounds {
    pub min_y: i64,
    pub max_y: i64,
}

impl VerticalBounds {
    pub fn new(min_y: i64, max_y: i64) -> Self {
        Self { min_y, max_y }
    }
}

impl Default for VerticalBounds {
    fn default() -> Self {
        Self::new(0, 256)
    }
}

/// Change notification and data access for one chunk column
pub trait ChunkHandle: Send + Sync {
    fn subscribe_changed(&self, callback: ChangeCallback) -> SubscriptionId;

    fn unsubscribe_changed(&self, id: SubscriptionId);

    /// Current block data.
    ///
    /// `Ok(None)` means the chunk exists but carries no block component.
    fn block_data(&self) -> Result<Option<Arc<BlockData>>, ChunkError>;
}

/// The voxel store the engine reads from
pub trait WorldStore: Send + Sync {
    fn chunk_handle(&self, dimension: &DimensionId, cx: i64, cz: i64) -> Arc<dyn ChunkHandle>;

    /// Used only to size placeholder geometry
    fn bounds(&self, dimension: &DimensionId) -> VerticalBounds;
}

/// Keeps a change callback registered. Unsubscribes exactly once when dropped.
pub struct Subscription {
    handle: Arc<dyn ChunkHandle>,
    id: SubscriptionId,
}

impl Subscription {
    pub fn new(handle: Arc<dyn ChunkHandle>, callback: ChangeCallback) -> Self {
        let id = handle.subscribe_changed(callback);
        Self { handle, id }
    }

    pub fn handle(&self) -> &Arc<dyn ChunkHandle> {
        &self.handle
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe_changed(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

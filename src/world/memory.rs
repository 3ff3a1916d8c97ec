//! In-memory world store
//!
//! Used by the tests and the tools. Chunk data is copy-on-write, so a mesher
//! holding an `Arc<BlockData>` keeps a consistent snapshot while writers update
//! the chunk.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use super::{
    Block, BlockData, BlockPos, ChangeCallback, ChunkHandle, ChunkKey, DimensionId,
    SubscriptionId, VerticalBounds, WorldStore,
};
use crate::error::ChunkError;

#[derive(Debug, Clone)]
enum ChunkState {
    Missing,
    Failed(String),
    Loaded(Option<Arc<BlockData>>),
}

struct MemoryChunk {
    cx: i64,
    cz: i64,
    state: RwLock<ChunkState>,
    callbacks: Mutex<FxHashMap<SubscriptionId, Arc<dyn Fn() + Send + Sync>>>,
    next_id: AtomicU64,
    /// Shared with the owning world
    live_subscriptions: Arc<AtomicUsize>,
}

impl MemoryChunk {
    fn fire_changed(&self) {
        // Callbacks run without the callback lock held so they may unsubscribe
        let callbacks: Vec<_> = self.callbacks.lock().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl ChunkHandle for MemoryChunk {
    fn subscribe_changed(&self, callback: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().insert(id, Arc::from(callback));
        self.live_subscriptions.fetch_add(1, Ordering::SeqCst);
        id
    }

    fn unsubscribe_changed(&self, id: SubscriptionId) {
        if self.callbacks.lock().remove(&id).is_some() {
            self.live_subscriptions.fetch_sub(1, Ordering::SeqCst);
        } else {
            log::warn!(
                "[MemoryChunk::unsubscribe_changed] Unknown subscription {:?} on chunk {}, {}",
                id,
                self.cx,
                self.cz
            );
        }
    }

    fn block_data(&self) -> Result<Option<Arc<BlockData>>, ChunkError> {
        match &*self.state.read() {
            ChunkState::Missing => Err(ChunkError::DoesNotExist {
                cx: self.cx,
                cz: self.cz,
            }),
            ChunkState::Failed(message) => Err(ChunkError::LoadFailed {
                cx: self.cx,
                cz: self.cz,
                message: message.clone(),
            }),
            ChunkState::Loaded(data) => Ok(data.clone()),
        }
    }
}

/// Thread-safe in-memory [`WorldStore`]
pub struct MemoryWorld {
    bounds: VerticalBounds,
    chunks: RwLock<FxHashMap<ChunkKey, Arc<MemoryChunk>>>,
    live_subscriptions: Arc<AtomicUsize>,
}

impl MemoryWorld {
    pub fn new(bounds: VerticalBounds) -> Self {
        Self {
            bounds,
            chunks: RwLock::new(FxHashMap::default()),
            live_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn chunk(&self, dimension: &DimensionId, cx: i64, cz: i64) -> Arc<MemoryChunk> {
        let key = ChunkKey::new(dimension.clone(), cx, cz);
        if let Some(chunk) = self.chunks.read().get(&key) {
            return chunk.clone();
        }

        self.chunks
            .write()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(MemoryChunk {
                    cx,
                    cz,
                    state: RwLock::new(ChunkState::Missing),
                    callbacks: Mutex::new(FxHashMap::default()),
                    next_id: AtomicU64::new(0),
                    live_subscriptions: self.live_subscriptions.clone(),
                })
            })
            .clone()
    }

    fn replace_state(&self, dimension: &DimensionId, cx: i64, cz: i64, state: ChunkState) {
        let chunk = self.chunk(dimension, cx, cz);
        *chunk.state.write() = state;
        chunk.fire_changed();
    }

    /// Store block data for a chunk and notify subscribers
    pub fn insert_chunk(&self, dimension: &DimensionId, cx: i64, cz: i64, data: BlockData) {
        self.replace_state(dimension, cx, cz, ChunkState::Loaded(Some(Arc::new(data))));
    }

    /// Create a chunk that has no block data at all
    pub fn insert_empty_chunk(&self, dimension: &DimensionId, cx: i64, cz: i64) {
        self.replace_state(dimension, cx, cz, ChunkState::Loaded(None));
    }

    pub fn remove_chunk(&self, dimension: &DimensionId, cx: i64, cz: i64) {
        self.replace_state(dimension, cx, cz, ChunkState::Missing);
    }

    /// Make subsequent reads of the chunk fail with [`ChunkError::LoadFailed`]
    pub fn fail_chunk(&self, dimension: &DimensionId, cx: i64, cz: i64, message: impl Into<String>) {
        self.replace_state(dimension, cx, cz, ChunkState::Failed(message.into()));
    }

    /// Set one block, creating the chunk if needed, and notify subscribers
    pub fn set_block(&self, dimension: &DimensionId, pos: BlockPos, block: &Block) {
        let (cx, cz) = pos.chunk_coords();
        let (x, _, z) = pos.local();
        let chunk = self.chunk(dimension, cx, cz);
        {
            let mut state = chunk.state.write();
            let mut data = match &*state {
                ChunkState::Loaded(Some(data)) => data.clone(),
                _ => Arc::new(BlockData::new()),
            };
            Arc::make_mut(&mut data).set_block(x, pos.y, z, block);
            *state = ChunkState::Loaded(Some(data));
        }
        chunk.fire_changed();
    }

    /// Fire the change notification without touching the data
    pub fn mark_changed(&self, dimension: &DimensionId, cx: i64, cz: i64) {
        self.chunk(dimension, cx, cz).fire_changed();
    }

    /// Number of change callbacks currently registered across all chunks
    pub fn subscription_count(&self) -> usize {
        self.live_subscriptions.load(Ordering::SeqCst)
    }

    /// Number of callbacks registered on one chunk
    pub fn chunk_subscription_count(&self, dimension: &DimensionId, cx: i64, cz: i64) -> usize {
        let key = ChunkKey::new(dimension.clone(), cx, cz);
        self.chunks
            .read()
            .get(&key)
            .map_or(0, |chunk| chunk.callbacks.lock().len())
    }
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new(VerticalBounds::default())
    }
}

impl WorldStore for MemoryWorld {
    fn chunk_handle(&self, dimension: &DimensionId, cx: i64, cz: i64) -> Arc<dyn ChunkHandle> {
        self.chunk(dimension, cx, cz)
    }

    fn bounds(&self, _dimension: &DimensionId) -> VerticalBounds {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Subscription;

    fn overworld() -> DimensionId {
        DimensionId::new("minecraft:overworld")
    }

    #[test]
    fn test_missing_and_failed_chunks() {
        let world = MemoryWorld::default();
        let handle = world.chunk_handle(&overworld(), 1, 2);
        assert_eq!(
            handle.block_data().unwrap_err(),
            ChunkError::DoesNotExist { cx: 1, cz: 2 }
        );

        world.fail_chunk(&overworld(), 1, 2, "corrupt");
        assert!(matches!(
            handle.block_data(),
            Err(ChunkError::LoadFailed { .. })
        ));

        world.insert_empty_chunk(&overworld(), 1, 2);
        assert!(handle.block_data().unwrap().is_none());
    }

    #[test]
    fn test_set_block_notifies_and_copies_on_write() {
        let world = MemoryWorld::default();
        let dimension = overworld();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let subscription = Subscription::new(
            world.chunk_handle(&dimension, 0, -1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        world.set_block(&dimension, BlockPos::new(1, 64, -3), &Block::parse("stone"));
        let before = subscription.handle().block_data().unwrap().unwrap();

        world.set_block(&dimension, BlockPos::new(1, 65, -3), &Block::parse("dirt"));
        let after = subscription.handle().block_data().unwrap().unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(before.block(1, 65, 13).is_some_and(Block::is_air));
        assert_eq!(after.block(1, 65, 13), Some(&Block::parse("dirt")));
    }

    #[test]
    fn test_subscription_guard_unsubscribes_once() {
        let world = MemoryWorld::default();
        let dimension = overworld();
        let subscription = Subscription::new(world.chunk_handle(&dimension, 0, 0), Box::new(|| {}));
        assert_eq!(world.subscription_count(), 1);
        assert_eq!(world.chunk_subscription_count(&dimension, 0, 0), 1);

        drop(subscription);
        assert_eq!(world.subscription_count(), 0);
    }
}

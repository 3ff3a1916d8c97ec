use std::sync::Arc;

use crate::error::ChunkError;
use crate::world::{BlockData, ChunkKey, WorldStore};

/// Chunk offsets in snapshot order: north, west, self, east, south.
/// The index of `(dx, dz)` is `2 + dx + 2 * dz`.
pub const NEIGHBOUR_OFFSETS: [(i64, i64); 5] = [(0, -1), (-1, 0), (0, 0), (1, 0), (0, 1)];

pub const CENTER: usize = 2;

/// Read only view of a chunk and its four horizontal neighbours
#[derive(Debug, Clone)]
pub struct Neighbourhood {
    center: Arc<BlockData>,
    /// Indexed by [`Neighbourhood::index`]. The centre slot is always set.
    chunks: [Option<Arc<BlockData>>; 5],
}

impl Neighbourhood {
    /// Take a snapshot around `key`.
    ///
    /// Errors reading the centre chunk are returned. `Ok(None)` means the centre
    /// chunk has no block data. A neighbour that is missing or fails to load is
    /// treated as absent.
    pub fn snapshot(world: &dyn WorldStore, key: &ChunkKey) -> Result<Option<Self>, ChunkError> {
        let Some(center) = world
            .chunk_handle(&key.dimension, key.cx, key.cz)
            .block_data()?
        else {
            return Ok(None);
        };

        let mut chunks: [Option<Arc<BlockData>>; 5] = Default::default();
        for (index, (dx, dz)) in NEIGHBOUR_OFFSETS.into_iter().enumerate() {
            chunks[index] = if index == CENTER {
                Some(center.clone())
            } else {
                world
                    .chunk_handle(&key.dimension, key.cx + dx, key.cz + dz)
                    .block_data()
                    .ok()
                    .flatten()
            };
        }
        Ok(Some(Self { center, chunks }))
    }

    /// Build a neighbourhood from a centre chunk and its neighbours in
    /// snapshot order. The centre slot of `chunks` is overwritten.
    pub fn from_chunks(center: Arc<BlockData>, mut chunks: [Option<Arc<BlockData>>; 5]) -> Self {
        chunks[CENTER] = Some(center.clone());
        Self { center, chunks }
    }

    #[inline]
    pub fn index(dx: i64, dz: i64) -> usize {
        (2 + dx + 2 * dz) as usize
    }

    pub fn center(&self) -> &BlockData {
        &self.center
    }

    pub fn chunk(&self, index: usize) -> Option<&BlockData> {
        self.chunks[index].as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Block, BlockPos, DimensionId, MemoryWorld};

    #[test]
    fn test_index_matches_offsets() {
        for (index, (dx, dz)) in NEIGHBOUR_OFFSETS.into_iter().enumerate() {
            assert_eq!(Neighbourhood::index(dx, dz), index);
        }
    }

    #[test]
    fn test_snapshot_tolerates_bad_neighbours() {
        let world = MemoryWorld::default();
        let dimension = DimensionId::new("overworld");
        world.set_block(&dimension, BlockPos::new(0, 0, 0), &Block::parse("stone"));
        world.set_block(&dimension, BlockPos::new(16, 0, 0), &Block::parse("stone"));
        world.fail_chunk(&dimension, -1, 0, "corrupt");

        let key = ChunkKey::new(dimension, 0, 0);
        let snapshot = Neighbourhood::snapshot(&world, &key).unwrap().unwrap();
        assert!(snapshot.chunk(Neighbourhood::index(1, 0)).is_some());
        assert!(snapshot.chunk(Neighbourhood::index(-1, 0)).is_none());
        assert!(snapshot.chunk(Neighbourhood::index(0, 1)).is_none());
        assert_eq!(snapshot.center().palette.len(), 2);
    }

    #[test]
    fn test_snapshot_propagates_centre_errors() {
        let world = MemoryWorld::default();
        let key = ChunkKey::new(DimensionId::new("overworld"), 4, 4);
        assert_eq!(
            Neighbourhood::snapshot(&world, &key).unwrap_err(),
            ChunkError::DoesNotExist { cx: 4, cz: 4 }
        );

        world.insert_empty_chunk(&key.dimension, 4, 4);
        assert!(Neighbourhood::snapshot(&world, &key).unwrap().is_none());
    }
}

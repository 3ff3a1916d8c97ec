//! Chunk mesher
//!
//! [`mesh_chunk`] turns one chunk, read together with its four neighbours, into
//! a flat list of [`ChunkVertex`]. It never fails: chunks that are missing or
//! fail to load produce placeholder geometry. The mesher holds no state, so it
//! can run for different chunks on many threads at once.

mod blocks;
mod neighbourhood;
mod placeholder;
mod vertex;

pub use blocks::mesh_blocks;
pub use neighbourhood::{Neighbourhood, NEIGHBOUR_OFFSETS};
pub use placeholder::{checkerboard_tint, placeholder_mesh, PLANE_VERTEX_COUNT};
pub use vertex::{ChunkVertex, FLOATS_PER_VERTEX};

use crate::error::ChunkError;
use crate::resource_pack::{ResourcePack, CHUNK_GRID_ERROR, CHUNK_GRID_NULL};
use crate::world::{ChunkKey, WorldStore};

/// What a mesh was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshKind {
    Blocks,
    /// The chunk exists but has no block data
    NoBlockData,
    /// Placeholder for a chunk that does not exist
    Missing,
    /// Placeholder for a chunk that failed to load
    LoadError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMesh {
    pub kind: MeshKind,
    pub vertices: Vec<ChunkVertex>,
}

impl ChunkMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// Mesh one chunk against the world and resource pack
pub fn mesh_chunk(world: &dyn WorldStore, resource_pack: &ResourcePack, key: &ChunkKey) -> ChunkMesh {
    match Neighbourhood::snapshot(world, key) {
        Ok(Some(neighbourhood)) => ChunkMesh {
            kind: MeshKind::Blocks,
            vertices: mesh_blocks(&neighbourhood, resource_pack),
        },
        Ok(None) => {
            log::debug!("[mesh_chunk] Chunk {} has no block data", key);
            ChunkMesh {
                kind: MeshKind::NoBlockData,
                vertices: Vec::new(),
            }
        }
        Err(ChunkError::DoesNotExist { .. }) => {
            log::debug!("[mesh_chunk] Chunk {} does not exist", key);
            ChunkMesh {
                kind: MeshKind::Missing,
                vertices: placeholder_mesh(
                    world.bounds(&key.dimension),
                    resource_pack,
                    CHUNK_GRID_NULL,
                    key.cx,
                    key.cz,
                ),
            }
        }
        Err(e @ ChunkError::LoadFailed { .. }) => {
            log::warn!("[mesh_chunk] Chunk {} failed to load: {}", key, e);
            ChunkMesh {
                kind: MeshKind::LoadError,
                vertices: placeholder_mesh(
                    world.bounds(&key.dimension),
                    resource_pack,
                    CHUNK_GRID_ERROR,
                    key.cx,
                    key.cz,
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Block, BlockPos, DimensionId, MemoryWorld, VerticalBounds};

    fn setup() -> (MemoryWorld, ResourcePack, DimensionId) {
        (
            MemoryWorld::new(VerticalBounds::new(-64, 320)),
            ResourcePack::builtin().unwrap(),
            DimensionId::new("minecraft:overworld"),
        )
    }

    #[test]
    fn test_missing_chunk_placeholder_is_deterministic() {
        let (world, pack, dimension) = setup();
        let key = ChunkKey::new(dimension, 5, -2);
        let first = mesh_chunk(&world, &pack, &key);
        let second = mesh_chunk(&world, &pack, &key);
        assert_eq!(first.kind, MeshKind::Missing);
        assert_eq!(first.vertex_count(), 24);
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert!(first.vertices.iter().all(|v| v.tint == checkerboard_tint(5, -2)));
        assert!(first
            .vertices
            .iter()
            .all(|v| v.tex_bounds == pack.texture_bounds(CHUNK_GRID_NULL)));
    }

    #[test]
    fn test_load_failure_uses_error_texture() {
        let (world, pack, dimension) = setup();
        world.fail_chunk(&dimension, 0, 0, "bad region file");
        let mesh = mesh_chunk(&world, &pack, &ChunkKey::new(dimension, 0, 0));
        assert_eq!(mesh.kind, MeshKind::LoadError);
        assert_eq!(mesh.vertex_count(), 24);
        assert!(mesh
            .vertices
            .iter()
            .all(|v| v.tex_bounds == pack.texture_bounds(CHUNK_GRID_ERROR)));
    }

    #[test]
    fn test_chunk_without_block_data_is_empty() {
        let (world, pack, dimension) = setup();
        world.insert_empty_chunk(&dimension, 1, 1);
        let mesh = mesh_chunk(&world, &pack, &ChunkKey::new(dimension, 1, 1));
        assert_eq!(mesh.kind, MeshKind::NoBlockData);
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_blocks_are_meshed_in_chunk_space() {
        let (world, pack, dimension) = setup();
        world.set_block(&dimension, BlockPos::new(-15, 10, 33), &Block::parse("stone"));
        let mesh = mesh_chunk(&world, &pack, &ChunkKey::new(dimension, -1, 2));
        assert_eq!(mesh.kind, MeshKind::Blocks);
        assert_eq!(mesh.vertex_count(), 36);
        assert!(mesh.vertices.iter().all(|v| (1.0..=2.0).contains(&v.position[0])));
        assert!(mesh.vertices.iter().all(|v| (1.0..=2.0).contains(&v.position[2])));
        assert_eq!(mesh.as_bytes().len(), 36 * FLOATS_PER_VERTEX * 4);
    }
}

use std::fmt;

use cgmath::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Horizontal size of a chunk in blocks
pub const CHUNK_SIZE: i64 = 16;

/// Identifier of an independent voxel space within a level
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionId(pub String);

impl DimensionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DimensionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identity of a chunk column: dimension plus chunk coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub dimension: DimensionId,
    pub cx: i64,
    pub cz: i64,
}

impl ChunkKey {
    pub fn new(dimension: DimensionId, cx: i64, cz: i64) -> Self {
        Self { dimension, cx, cz }
    }

    /// Key of the chunk offset by the given amounts in the same dimension
    pub fn offset(&self, dx: i64, dz: i64) -> Self {
        Self::new(self.dimension.clone(), self.cx + dx, self.cz + dz)
    }

    /// `max(|dx|, |dz|)` to a chunk coordinate. Used for eviction.
    pub fn chebyshev_distance(&self, cx: i64, cz: i64) -> u64 {
        (self.cx - cx).unsigned_abs().max((self.cz - cz).unsigned_abs())
    }

    /// `|dx| + |dz|` to a chunk coordinate. Used for ordering.
    pub fn manhattan_distance(&self, cx: i64, cz: i64) -> u64 {
        (self.cx - cx).unsigned_abs() + (self.cz - cz).unsigned_abs()
    }

    /// World space placement of the chunk's geometry
    pub fn model_transform(&self) -> Matrix4<f32> {
        Matrix4::from_translation(Vector3::new(
            (self.cx * CHUNK_SIZE) as f32,
            0.0,
            (self.cz * CHUNK_SIZE) as f32,
        ))
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.dimension, self.cx, self.cz)
    }
}

/// Position of a block in world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockPos {
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Chunk coordinates containing this block
    pub fn chunk_coords(&self) -> (i64, i64) {
        (self.x.div_euclid(CHUNK_SIZE), self.z.div_euclid(CHUNK_SIZE))
    }

    /// Section (vertical chunk slice) index containing this block
    pub fn section_index(&self) -> i64 {
        self.y.div_euclid(CHUNK_SIZE)
    }

    /// Position within the containing section
    pub fn local(&self) -> (usize, usize, usize) {
        (
            self.x.rem_euclid(CHUNK_SIZE) as usize,
            self.y.rem_euclid(CHUNK_SIZE) as usize,
            self.z.rem_euclid(CHUNK_SIZE) as usize,
        )
    }
}

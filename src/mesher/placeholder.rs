//! Placeholder geometry for chunks without block data
//!
//! A missing or broken chunk is drawn as a floor and a ceiling grid at the
//! vertical bounds of the dimension, so it reads as a distinct tile instead of
//! a hole.

use super::ChunkVertex;
use crate::resource_pack::ResourcePack;
use crate::world::VerticalBounds;

/// Vertices in one double sided plane
pub const PLANE_VERTEX_COUNT: usize = 12;

/// Offset that keeps the planes from z-fighting with blocks at the bounds
const PLANE_OFFSET: f32 = 0.01;

/// Tint alternating between neighbouring chunks
pub fn checkerboard_tint(cx: i64, cz: i64) -> [f32; 3] {
    if (cx + cz).rem_euclid(2) == 1 {
        [1.0, 1.0, 1.0]
    } else {
        [0.8, 0.8, 0.8]
    }
}

/// Append a 16x16 plane at `height` visible from above and below
fn push_plane(vertices: &mut Vec<ChunkVertex>, height: f32, tex_bounds: [f32; 4], tint: [f32; 3]) {
    // Corner order per side, wound so the first side faces down
    const SIDES: [[([f32; 2], [f32; 2]); 4]; 2] = [
        [
            ([0.0, 0.0], [0.0, 0.0]),
            ([16.0, 0.0], [16.0, 0.0]),
            ([16.0, 16.0], [16.0, 16.0]),
            ([0.0, 16.0], [0.0, 16.0]),
        ],
        [
            ([0.0, 16.0], [0.0, 0.0]),
            ([16.0, 16.0], [16.0, 0.0]),
            ([16.0, 0.0], [16.0, 16.0]),
            ([0.0, 0.0], [0.0, 16.0]),
        ],
    ];

    for corners in SIDES {
        for index in [0, 1, 2, 0, 2, 3] {
            let ([x, z], tex_coord) = corners[index];
            vertices.push(ChunkVertex::new([x, height, z], tex_coord, tex_bounds, tint));
        }
    }
}

/// Floor and ceiling planes textured with `texture_path`
pub fn placeholder_mesh(
    bounds: VerticalBounds,
    resource_pack: &ResourcePack,
    texture_path: &str,
    cx: i64,
    cz: i64,
) -> Vec<ChunkVertex> {
    let tex_bounds = resource_pack.texture_bounds(texture_path);
    let tint = checkerboard_tint(cx, cz);
    let mut vertices = Vec::with_capacity(PLANE_VERTEX_COUNT * 2);
    push_plane(&mut vertices, bounds.min_y as f32 - PLANE_OFFSET, tex_bounds, tint);
    push_plane(&mut vertices, bounds.max_y as f32 + PLANE_OFFSET, tex_bounds, tint);
    vertices
}

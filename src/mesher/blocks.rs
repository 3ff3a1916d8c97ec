use std::sync::Arc;

use super::neighbourhood::{Neighbourhood, CENTER};
use super::ChunkVertex;
use crate::resource_pack::{BlockMesh, BlockMeshPart, CullDirection, ResourcePack, Transparency};
use crate::world::{BlockData, Section};

const PADDED: usize = 18;

#[inline]
fn padded_index(x: usize, y: usize, z: usize) -> usize {
    (x * PADDED + y) * PADDED + z
}

/// Models for every palette entry of each chunk in the neighbourhood
struct ModelTable {
    models: [Vec<Arc<BlockMesh>>; 5],
    missing: Arc<BlockMesh>,
}

impl ModelTable {
    fn new(neighbourhood: &Neighbourhood, resource_pack: &ResourcePack) -> Self {
        let mut models: [Vec<Arc<BlockMesh>>; 5] = Default::default();
        for (index, slot) in models.iter_mut().enumerate() {
            if let Some(chunk) = neighbourhood.chunk(index) {
                *slot = chunk
                    .palette
                    .iter()
                    .map(|block| resource_pack.block_model(block))
                    .collect();
            }
        }
        Self {
            models,
            missing: resource_pack.missing_model(),
        }
    }

    #[inline]
    fn get(&self, chunk: usize, palette_index: u32) -> &BlockMesh {
        self.models[chunk]
            .get(palette_index as usize)
            .unwrap_or(&self.missing)
    }
}

/// The section at height `cy` of the chunk at `(dx, dz)`, with the chunk's index
fn neighbour_section(
    neighbourhood: &Neighbourhood,
    dx: i64,
    dz: i64,
    cy: i64,
) -> Option<(usize, &Section)> {
    let index = Neighbourhood::index(dx, dz);
    let chunk: &BlockData = neighbourhood.chunk(index)?;
    Some((index, chunk.section(cy)?))
}

/// Transparency of one section padded by one cell on every side
struct TransparencyGrid {
    cells: Vec<Transparency>,
}

impl TransparencyGrid {
    fn new(
        neighbourhood: &Neighbourhood,
        table: &ModelTable,
        cy: i64,
        section: &Section,
    ) -> Self {
        let mut cells = vec![Transparency::Partial; PADDED * PADDED * PADDED];
        let center = neighbourhood.center();

        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    cells[padded_index(x + 1, y + 1, z + 1)] =
                        table.get(CENTER, section.get(x, y, z)).transparency;
                }
            }
        }

        if let Some(up) = center.section(cy + 1) {
            for x in 0..16 {
                for z in 0..16 {
                    cells[padded_index(x + 1, PADDED - 1, z + 1)] =
                        table.get(CENTER, up.get(x, 0, z)).transparency;
                }
            }
        }

        if let Some(down) = center.section(cy - 1) {
            for x in 0..16 {
                for z in 0..16 {
                    cells[padded_index(x + 1, 0, z + 1)] =
                        table.get(CENTER, down.get(x, 15, z)).transparency;
                }
            }
        }

        let neighbour = |dx, dz| neighbour_section(neighbourhood, dx, dz, cy);

        if let Some((index, north)) = neighbour(0, -1) {
            for x in 0..16 {
                for y in 0..16 {
                    cells[padded_index(x + 1, y + 1, 0)] =
                        table.get(index, north.get(x, y, 15)).transparency;
                }
            }
        }

        if let Some((index, south)) = neighbour(0, 1) {
            for x in 0..16 {
                for y in 0..16 {
                    cells[padded_index(x + 1, y + 1, PADDED - 1)] =
                        table.get(index, south.get(x, y, 0)).transparency;
                }
            }
        }

        if let Some((index, east)) = neighbour(1, 0) {
            for y in 0..16 {
                for z in 0..16 {
                    cells[padded_index(PADDED - 1, y + 1, z + 1)] =
                        table.get(index, east.get(0, y, z)).transparency;
                }
            }
        }

        if let Some((index, west)) = neighbour(-1, 0) {
            for y in 0..16 {
                for z in 0..16 {
                    cells[padded_index(0, y + 1, z + 1)] =
                        table.get(index, west.get(15, y, z)).transparency;
                }
            }
        }

        Self { cells }
    }

    /// Whether a face of a block with `own` transparency, facing the cell at
    /// padded `(x, y, z)`, is hidden
    #[inline]
    fn hides(&self, x: usize, y: usize, z: usize, own: Transparency) -> bool {
        match self.cells[padded_index(x, y, z)] {
            Transparency::FullOpaque => true,
            Transparency::FullTranslucent => own == Transparency::FullTranslucent,
            Transparency::Partial => false,
        }
    }
}

struct PartWriter<'a> {
    resource_pack: &'a ResourcePack,
    origin: [f32; 3],
}

impl PartWriter<'_> {
    fn write(&self, out: &mut Vec<ChunkVertex>, mesh: &BlockMesh, part: &BlockMeshPart, shading: f32) {
        for triangle in &part.triangles {
            let tex_bounds = match mesh.textures.get(triangle.texture_index) {
                Some(texture) => self.resource_pack.texture_bounds(texture),
                None => self.resource_pack.texture_bounds(crate::resource_pack::MISSING_TEXTURE),
            };
            for vert_index in [triangle.a, triangle.b, triangle.c] {
                let Some(vert) = part.verts.get(vert_index) else {
                    continue;
                };
                out.push(ChunkVertex::new(
                    [
                        self.origin[0] + vert.coord[0],
                        self.origin[1] + vert.coord[1],
                        self.origin[2] + vert.coord[2],
                    ],
                    vert.texture_coord,
                    tex_bounds,
                    [
                        vert.tint[0] * shading,
                        vert.tint[1] * shading,
                        vert.tint[2] * shading,
                    ],
                ));
            }
        }
    }
}

/// Mesh the block data of the centre chunk. Opaque geometry comes first,
/// followed by everything that is not fully opaque.
pub fn mesh_blocks(neighbourhood: &Neighbourhood, resource_pack: &ResourcePack) -> Vec<ChunkVertex> {
    let table = ModelTable::new(neighbourhood, resource_pack);
    let mut opaque = Vec::new();
    let mut translucent = Vec::new();

    for (&cy, section) in &neighbourhood.center().sections {
        let grid = TransparencyGrid::new(neighbourhood, &table, cy, section);

        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let mesh = table.get(CENTER, section.get(x, y, z));
                    if mesh.is_empty() {
                        continue;
                    }
                    let out = if mesh.transparency == Transparency::FullOpaque {
                        &mut opaque
                    } else {
                        &mut translucent
                    };
                    let writer = PartWriter {
                        resource_pack,
                        origin: [x as f32, (cy * 16 + y as i64) as f32, z as f32],
                    };

                    for direction in CullDirection::ALL {
                        let Some(part) = mesh.part(direction) else {
                            continue;
                        };
                        if let Some((dx, dy, dz)) = direction.offset() {
                            let nx = (x as i32 + dx + 1) as usize;
                            let ny = (y as i32 + dy + 1) as usize;
                            let nz = (z as i32 + dz + 1) as usize;
                            if grid.hides(nx, ny, nz, mesh.transparency) {
                                continue;
                            }
                        }
                        writer.write(out, mesh, part, direction.shading());
                    }
                }
            }
        }
    }

    opaque.extend(translucent);
    opaque
}

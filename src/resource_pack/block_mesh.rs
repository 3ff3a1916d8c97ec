use serde::{Deserialize, Serialize};

/// How a block lets light and neighbouring faces through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transparency {
    /// Fills its cell and hides every face behind it
    #[default]
    FullOpaque,
    /// Fills its cell but can be seen through (glass, water)
    FullTranslucent,
    /// Does not fill its cell
    Partial,
}

/// The neighbour that can hide a mesh part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullDirection {
    None = 0,
    Up = 1,
    Down = 2,
    North = 3,
    East = 4,
    South = 5,
    West = 6,
}

impl CullDirection {
    pub const ALL: [CullDirection; 7] = [
        CullDirection::None,
        CullDirection::Up,
        CullDirection::Down,
        CullDirection::North,
        CullDirection::East,
        CullDirection::South,
        CullDirection::West,
    ];

    /// Offset to the neighbouring cell. `None` has no neighbour.
    pub fn offset(self) -> Option<(i32, i32, i32)> {
        match self {
            CullDirection::None => None,
            CullDirection::Up => Some((0, 1, 0)),
            CullDirection::Down => Some((0, -1, 0)),
            CullDirection::North => Some((0, 0, -1)),
            CullDirection::East => Some((1, 0, 0)),
            CullDirection::South => Some((0, 0, 1)),
            CullDirection::West => Some((-1, 0, 0)),
        }
    }

    /// Directional shading applied to faces on this side
    pub fn shading(self) -> f32 {
        match self {
            CullDirection::None | CullDirection::Up => 1.0,
            CullDirection::Down => 0.55,
            CullDirection::North | CullDirection::South => 0.85,
            CullDirection::East | CullDirection::West => 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshVertex {
    /// Position within the block's unit cell
    pub coord: [f32; 3],
    pub texture_coord: [f32; 2],
    pub tint: [f32; 3],
}

/// Triangle indexing into its part's vertices and the mesh's texture list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshTriangle {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub texture_index: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockMeshPart {
    pub verts: Vec<MeshVertex>,
    pub triangles: Vec<MeshTriangle>,
}

impl BlockMeshPart {
    /// Append a quad given counter clockwise corners as seen from its front
    fn push_quad(&mut self, corners: [[f32; 3]; 4], texture_index: usize) {
        const UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
        let base = self.verts.len();
        for (coord, texture_coord) in corners.into_iter().zip(UVS) {
            self.verts.push(MeshVertex {
                coord,
                texture_coord,
                tint: [1.0; 3],
            });
        }
        for (a, b, c) in [(0, 1, 2), (0, 2, 3)] {
            self.triangles.push(MeshTriangle {
                a: base + a,
                b: base + b,
                c: base + c,
                texture_index,
            });
        }
    }

    fn quad(corners: [[f32; 3]; 4], texture_index: usize) -> Self {
        let mut part = Self::default();
        part.push_quad(corners, texture_index);
        part
    }
}

/// Textures for the six faces of a cube
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeTextures {
    pub up: String,
    pub down: String,
    pub north: String,
    pub east: String,
    pub south: String,
    pub west: String,
}

impl CubeTextures {
    pub fn all(texture: impl Into<String>) -> Self {
        let texture = texture.into();
        Self::column(texture.clone(), texture.clone(), texture)
    }

    /// Distinct top and bottom with the same texture on every side
    pub fn column(up: impl Into<String>, down: impl Into<String>, side: impl Into<String>) -> Self {
        let side = side.into();
        Self {
            up: up.into(),
            down: down.into(),
            north: side.clone(),
            east: side.clone(),
            south: side.clone(),
            west: side,
        }
    }
}

/// Renderable model of one block state
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMesh {
    pub transparency: Transparency,
    pub textures: Vec<String>,
    /// Indexed by [`CullDirection`]
    pub parts: [Option<BlockMeshPart>; 7],
}

impl BlockMesh {
    /// A model with no geometry
    pub fn air() -> Self {
        Self {
            transparency: Transparency::Partial,
            textures: Vec::new(),
            parts: Default::default(),
        }
    }

    /// A unit cube with one culled part per face
    pub fn cube(textures: CubeTextures, transparency: Transparency) -> Self {
        let CubeTextures {
            up,
            down,
            north,
            east,
            south,
            west,
        } = textures;
        let mut parts: [Option<BlockMeshPart>; 7] = Default::default();
        parts[CullDirection::Up as usize] = Some(BlockMeshPart::quad(
            [[0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            0,
        ));
        parts[CullDirection::Down as usize] = Some(BlockMeshPart::quad(
            [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
            1,
        ));
        parts[CullDirection::North as usize] = Some(BlockMeshPart::quad(
            [[1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]],
            2,
        ));
        parts[CullDirection::East as usize] = Some(BlockMeshPart::quad(
            [[1.0, 0.0, 1.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0]],
            3,
        ));
        parts[CullDirection::South as usize] = Some(BlockMeshPart::quad(
            [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]],
            4,
        ));
        parts[CullDirection::West as usize] = Some(BlockMeshPart::quad(
            [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]],
            5,
        ));
        Self {
            transparency,
            textures: vec![up, down, north, east, south, west],
            parts,
        }
    }

    /// Two crossed double sided quads, never culled. Used for plants.
    pub fn cross(texture: impl Into<String>) -> Self {
        let mut part = BlockMeshPart::default();
        let diagonals = [
            [[0.0, 0.0, 0.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 0.0]],
            [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [1.0, 1.0, 0.0]],
        ];
        for [a, b, c, d] in diagonals {
            part.push_quad([a, b, c, d], 0);
            part.push_quad([b, a, d, c], 0);
        }
        let mut parts: [Option<BlockMeshPart>; 7] = Default::default();
        parts[CullDirection::None as usize] = Some(part);
        Self {
            transparency: Transparency::Partial,
            textures: vec![texture.into()],
            parts,
        }
    }

    pub fn part(&self, direction: CullDirection) -> Option<&BlockMeshPart> {
        self.parts[direction as usize].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(Option::is_none)
    }
}

/// Shape of a block model definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelShape {
    #[default]
    Cube,
    Cross,
    Air,
}

/// One entry of a pack's `blocks.toml`
///
/// ```toml
/// [blocks."minecraft:grass_block"]
/// top = "block/grass_block_top"
/// bottom = "block/dirt"
/// side = "block/grass_block_side"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlockModelDef {
    pub shape: ModelShape,
    pub transparency: Transparency,
    /// Texture used for every face not named explicitly
    pub texture: Option<String>,
    pub top: Option<String>,
    pub bottom: Option<String>,
    pub side: Option<String>,
}

impl BlockModelDef {
    /// Build the mesh. Faces with no texture use `fallback`.
    pub fn to_mesh(&self, fallback: &str) -> BlockMesh {
        let base = self.texture.as_deref().unwrap_or(fallback);
        match self.shape {
            ModelShape::Air => BlockMesh::air(),
            ModelShape::Cross => BlockMesh::cross(base),
            ModelShape::Cube => BlockMesh::cube(
                CubeTextures::column(
                    self.top.as_deref().unwrap_or(base),
                    self.bottom.as_deref().unwrap_or(base),
                    self.side.as_deref().unwrap_or(base),
                ),
                self.transparency,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ]
    }

    fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
    }

    #[test]
    fn test_cube_faces_wind_outward() {
        let mesh = BlockMesh::cube(CubeTextures::all("block/stone"), Transparency::FullOpaque);
        for direction in &CullDirection::ALL[1..] {
            let part = mesh.part(*direction).expect("cube has every face");
            let (dx, dy, dz) = direction.offset().unwrap();
            for triangle in &part.triangles {
                let a = part.verts[triangle.a].coord;
                let b = part.verts[triangle.b].coord;
                let c = part.verts[triangle.c].coord;
                let normal = cross(sub(b, a), sub(c, a)).map(|n| {
                    if n > 0.0 {
                        1
                    } else if n < 0.0 {
                        -1
                    } else {
                        0
                    }
                });
                assert_eq!(normal, [dx, dy, dz], "{:?}", direction);
            }
        }
        assert!(mesh.part(CullDirection::None).is_none());
    }

    #[test]
    fn test_model_def_falls_back_to_texture() {
        let def: BlockModelDef = toml::from_str(
            r#"
            texture = "block/log_side"
            top = "block/log_top"
            "#,
        )
        .unwrap();
        let mesh = def.to_mesh("missing");
        assert_eq!(mesh.transparency, Transparency::FullOpaque);
        assert_eq!(mesh.textures[0], "block/log_top");
        assert_eq!(mesh.textures[1], "block/log_side");
        assert_eq!(mesh.textures[5], "block/log_side");
    }

    #[test]
    fn test_cross_and_air_shapes() {
        let def: BlockModelDef = toml::from_str("shape = \"cross\"").unwrap();
        let mesh = def.to_mesh("missing");
        assert_eq!(mesh.transparency, Transparency::Partial);
        assert_eq!(mesh.part(CullDirection::None).unwrap().triangles.len(), 8);

        let def: BlockModelDef = toml::from_str("shape = \"air\"").unwrap();
        assert!(def.to_mesh("missing").is_empty());
    }

    #[test]
    fn test_shading_values() {
        assert_eq!(CullDirection::Up.shading(), 1.0);
        assert_eq!(CullDirection::Down.shading(), 0.55);
        assert_eq!(CullDirection::North.shading(), 0.85);
        assert_eq!(CullDirection::West.shading(), 0.7);
    }
}

use bytemuck::{Pod, Zeroable};

/// Number of `f32` values in one [`ChunkVertex`]
pub const FLOATS_PER_VERTEX: usize = 12;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ChunkVertex {
    /// Chunk local position
    pub position: [f32; 3],
    /// Texture coordinate, wrapped into `tex_bounds` by the shader
    pub tex_coord: [f32; 2],
    /// `[u0, v0, u1, v1]` of the texture in the atlas
    pub tex_bounds: [f32; 4],
    pub tint: [f32; 3],
}

impl ChunkVertex {
    pub fn new(position: [f32; 3], tex_coord: [f32; 2], tex_bounds: [f32; 4], tint: [f32; 3]) -> Self {
        Self {
            position,
            tex_coord,
            tex_bounds,
            tint,
        }
    }

    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ChunkVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                // Position
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // Texture coordinate
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                // Atlas bounds
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // Tint
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 9]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

use cgmath::Matrix4;

use crate::error::GeometryResult;
use crate::resource_pack::TextureAtlas;

/// One chunk to draw: its geometry and its `projection * view * model` matrix
#[derive(Debug)]
pub struct ChunkDraw<'a, G> {
    pub geometry: &'a G,
    pub transform: Matrix4<f32>,
}

/// The GPU operations the level geometry needs.
///
/// Every method is called on the render thread only. Objects are destroyed by
/// value, so each one is released at most once.
pub trait GpuBackend {
    /// Shader program shared by every chunk
    type Program;
    /// Uploaded texture atlas
    type Texture;
    /// Uploaded vertices of one chunk
    type Geometry;

    fn create_program(&mut self) -> GeometryResult<Self::Program>;

    fn destroy_program(&mut self, program: Self::Program);

    fn create_texture(&mut self, atlas: &TextureAtlas) -> GeometryResult<Self::Texture>;

    fn destroy_texture(&mut self, texture: Self::Texture);

    /// Upload `vertex_count` vertices of [`ChunkVertex`](crate::mesher::ChunkVertex) layout
    fn create_geometry(&mut self, vertex_bytes: &[u8], vertex_count: u32) -> GeometryResult<Self::Geometry>;

    fn destroy_geometry(&mut self, geometry: Self::Geometry);

    /// Draw every chunk with one call each, in the order given
    fn draw_chunks(
        &mut self,
        program: &Self::Program,
        texture: &Self::Texture,
        draws: &[ChunkDraw<'_, Self::Geometry>],
    ) -> GeometryResult<()>;
}

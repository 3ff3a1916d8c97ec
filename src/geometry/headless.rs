//! CPU only backend
//!
//! Keeps the uploaded bytes in memory and counts every call, so the engine can
//! run without a GPU and leaks or double frees show up in the counters.

use cgmath::Matrix4;
use rustc_hash::FxHashMap;

use super::backend::{ChunkDraw, GpuBackend};
use crate::error::{gpu_operation_error, GeometryResult};
use crate::mesher::FLOATS_PER_VERTEX;
use crate::resource_pack::TextureAtlas;

#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessProgram {
    id: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessTexture {
    id: u64,
    pub size: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessGeometry {
    id: u64,
    pub vertex_count: u32,
}

impl HeadlessGeometry {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// One recorded draw call
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub geometry_id: u64,
    pub vertex_count: u32,
    pub transform: Matrix4<f32>,
}

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessCounters {
    pub programs_created: u64,
    pub programs_destroyed: u64,
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub geometry_created: u64,
    pub geometry_destroyed: u64,
    pub draw_calls: u64,
    pub frames: u64,
    pub double_frees: u64,
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    counters: HeadlessCounters,
    live_programs: FxHashMap<u64, ()>,
    live_textures: FxHashMap<u64, u32>,
    /// Uploaded bytes by geometry id
    live_geometry: FxHashMap<u64, Vec<u8>>,
    last_frame: Vec<DrawRecord>,
    /// Fail the next geometry upload
    fail_next_upload: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn counters(&self) -> HeadlessCounters {
        self.counters
    }

    pub fn live_programs(&self) -> usize {
        self.live_programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures.len()
    }

    pub fn live_geometry(&self) -> usize {
        self.live_geometry.len()
    }

    /// Bytes uploaded for a live geometry object
    pub fn geometry_bytes(&self, geometry: &HeadlessGeometry) -> Option<&[u8]> {
        self.live_geometry.get(&geometry.id).map(Vec::as_slice)
    }

    /// Draw calls issued by the most recent `draw_chunks`
    pub fn last_frame(&self) -> &[DrawRecord] {
        &self.last_frame
    }

    /// Make the next `create_geometry` call fail
    pub fn fail_next_upload(&mut self) {
        self.fail_next_upload = true;
    }
}

impl GpuBackend for HeadlessBackend {
    type Program = HeadlessProgram;
    type Texture = HeadlessTexture;
    type Geometry = HeadlessGeometry;

    fn create_program(&mut self) -> GeometryResult<HeadlessProgram> {
        let id = self.allocate_id();
        self.live_programs.insert(id, ());
        self.counters.programs_created += 1;
        Ok(HeadlessProgram { id })
    }

    fn destroy_program(&mut self, program: HeadlessProgram) {
        if self.live_programs.remove(&program.id).is_none() {
            self.counters.double_frees += 1;
        }
        self.counters.programs_destroyed += 1;
    }

    fn create_texture(&mut self, atlas: &TextureAtlas) -> GeometryResult<HeadlessTexture> {
        let id = self.allocate_id();
        self.live_textures.insert(id, atlas.size());
        self.counters.textures_created += 1;
        Ok(HeadlessTexture {
            id,
            size: atlas.size(),
        })
    }

    fn destroy_texture(&mut self, texture: HeadlessTexture) {
        if self.live_textures.remove(&texture.id).is_none() {
            self.counters.double_frees += 1;
        }
        self.counters.textures_destroyed += 1;
    }

    fn create_geometry(&mut self, vertex_bytes: &[u8], vertex_count: u32) -> GeometryResult<HeadlessGeometry> {
        if std::mem::take(&mut self.fail_next_upload) {
            return Err(gpu_operation_error("create_geometry", "injected upload failure"));
        }
        let expected = vertex_count as usize * FLOATS_PER_VERTEX * std::mem::size_of::<f32>();
        if vertex_bytes.len() != expected {
            return Err(gpu_operation_error(
                "create_geometry",
                format!("{} bytes for {} vertices", vertex_bytes.len(), vertex_count),
            ));
        }
        let id = self.allocate_id();
        self.live_geometry.insert(id, vertex_bytes.to_vec());
        self.counters.geometry_created += 1;
        Ok(HeadlessGeometry { id, vertex_count })
    }

    fn destroy_geometry(&mut self, geometry: HeadlessGeometry) {
        if self.live_geometry.remove(&geometry.id).is_none() {
            log::error!(
                "[HeadlessBackend::destroy_geometry] Geometry {} was already destroyed",
                geometry.id
            );
            self.counters.double_frees += 1;
        }
        self.counters.geometry_destroyed += 1;
    }

    fn draw_chunks(
        &mut self,
        program: &HeadlessProgram,
        texture: &HeadlessTexture,
        draws: &[ChunkDraw<'_, HeadlessGeometry>],
    ) -> GeometryResult<()> {
        if !self.live_programs.contains_key(&program.id) {
            return Err(gpu_operation_error("draw_chunks", "program is not live"));
        }
        if !self.live_textures.contains_key(&texture.id) {
            return Err(gpu_operation_error("draw_chunks", "texture is not live"));
        }

        self.last_frame.clear();
        for draw in draws {
            if !self.live_geometry.contains_key(&draw.geometry.id) {
                return Err(gpu_operation_error(
                    "draw_chunks",
                    format!("geometry {} is not live", draw.geometry.id),
                ));
            }
            self.last_frame.push(DrawRecord {
                geometry_id: draw.geometry.id,
                vertex_count: draw.geometry.vertex_count,
                transform: draw.transform,
            });
        }
        self.counters.draw_calls += draws.len() as u64;
        self.counters.frames += 1;
        Ok(())
    }
}

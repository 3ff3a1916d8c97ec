//! Level geometry
//!
//! Streams the chunks of a voxel world into renderable geometry around a
//! moving camera. Chunks are meshed on a bounded pool of worker threads, in
//! nearest-first order, and uploaded to the GPU on the render thread. Changes
//! reported by the world store re-mesh the affected chunks; chunks that move
//! out of range are evicted.
//!
//! ```no_run
//! use std::sync::Arc;
//! use level_geometry::{
//!     HeadlessBackend, LevelGeometry, LevelGeometryOptions, MemoryWorld, ResourcePack,
//!     ResourcePackHandle, VerticalBounds,
//! };
//!
//! # fn main() -> level_geometry::GeometryResult<()> {
//! let world = Arc::new(MemoryWorld::new(VerticalBounds::default()));
//! let pack = ResourcePackHandle::with_pack(ResourcePack::builtin()?);
//! let mut geometry = LevelGeometry::new(HeadlessBackend::new(), LevelGeometryOptions::new(world, pack))?;
//!
//! geometry.init_gl()?;
//! geometry.set_dimension("minecraft:overworld")?;
//! geometry.start()?;
//! geometry.set_location(0, 0)?;
//! geometry.process_pending()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod mesher;
pub mod resource_pack;
pub mod world;

pub use config::{LevelGeometryConfig, RenderSettings, RenderSettingsEvent, RenderSettingsHandle};
pub use diagnostics::{CollectingDiagnosticSink, DiagnosticReport, DiagnosticSink, LogDiagnosticSink};
pub use error::{ChunkError, GeometryError, GeometryResult};
pub use geometry::{
    ChunkStatus, FacadeState, FrameTarget, GeometryStats, GpuBackend, HeadlessBackend, LevelGeometry,
    LevelGeometryOptions, WgpuBackend,
};
pub use mesher::{mesh_chunk, ChunkMesh, ChunkVertex, MeshKind};
pub use resource_pack::{ResourcePack, ResourcePackHandle, TextureAtlas};
pub use world::{
    Block, BlockData, BlockPos, ChunkHandle, ChunkKey, DimensionId, MemoryWorld, VerticalBounds, WorldStore,
};

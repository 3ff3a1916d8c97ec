//! Chunk geometry streaming
//!
//! [`LevelGeometry`] keeps the chunks around a camera meshed and uploaded:
//!
//! - **Load order**: [`GridSpiral`] walks outward from the camera chunk
//! - **Cache**: [`ChunkCache`] of [`ChunkEntry`] values, nearest first
//! - **Scheduling**: a manager thread feeds a bounded rayon pool of meshing jobs
//! - **Installation**: finished meshes are uploaded on the GPU thread through a [`GpuBackend`]
//!
//! [`HeadlessBackend`] runs everything on the CPU for tests and tools;
//! [`WgpuBackend`] draws with wgpu.

mod backend;
mod cache;
mod facade;
mod headless;
mod scheduler;
mod spiral;
mod wgpu_backend;

pub use backend::{ChunkDraw, GpuBackend};
pub use cache::{ChunkCache, ChunkEntry};
pub use facade::{FacadeState, GpuThread, LevelGeometry, LevelGeometryOptions};
pub use headless::{
    DrawRecord, HeadlessBackend, HeadlessCounters, HeadlessGeometry, HeadlessProgram, HeadlessTexture,
};
pub use scheduler::{
    ChunkStatus, GeometryChangedCallback, GeometryStats, MeshResult, MANAGER_THREAD_NAME,
};
pub use spiral::GridSpiral;
pub use wgpu_backend::{FrameTarget, WgpuBackend, WgpuGeometry, WgpuProgram, WgpuTexture, DEPTH_FORMAT};

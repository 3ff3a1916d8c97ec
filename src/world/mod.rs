//! World store contract
//!
//! The engine never owns voxel data. It reads chunks through [`WorldStore`] and
//! [`ChunkHandle`], and listens for changes through a [`Subscription`].
//!
//! - **Position**: [`ChunkKey`], [`DimensionId`], [`BlockPos`]
//! - **Block data**: [`Block`], [`Section`], [`BlockData`]
//! - **Store**: the [`WorldStore`] and [`ChunkHandle`] traits
//! - **Memory**: [`MemoryWorld`], an in-memory store for tests and tools

mod block;
mod memory;
mod position;
mod store;

pub use block::{Block, BlockData, Section, SECTION_VOLUME};
pub use memory::MemoryWorld;
pub use position::{BlockPos, ChunkKey, DimensionId, CHUNK_SIZE};
pub use store::{
    ChangeCallback, ChunkHandle, Subscription, SubscriptionId, VerticalBounds, WorldStore,
};

//! Chunk partitioning and dispatch pacing for the voxel mapper.
//!
//! # Invariants
//! - Chunks tile the volume exactly; every voxel belongs to one chunk.
//! - Frustum culling is conservative: a chunk is skipped only when it lies
//!   fully outside one frustum plane.
//! - Pacing depends only on the timestamps passed in, never on the wall clock.

mod budget;
mod grid;

pub use budget::{BudgetConfig, DispatchBudget, FrameTimer, ScanStats};
pub use grid::{ChunkCoord, ChunkGrid, GridError};

//! Compute layer for the environment mappers: typed kernel handles, map
//! resources, uniform blocks and the backend that executes them.
//!
//! # Invariants
//! - A resource is mutated only by the mapper that owns it, one dispatch at a time.
//! - Dispatches complete in submission order.
//! - Kernel handles are bound once and checked on every dispatch.

mod backend;
mod cpu;
#[cfg(feature = "wgpu")]
mod gpu;
mod kernel;
mod recording;
mod resources;
mod uniforms;

pub use backend::{expect_kernel, expect_len, ComputeBackend, ComputeError};
pub use cpu::{CpuBackend, HEIGHT_GROUP_SIZE, RAYCAST_GROUP_SIZE, VOLUME_GROUP_SIZE};
#[cfg(feature = "wgpu")]
pub use gpu::WgpuBackend;
pub use kernel::{
    BoundKernel, HeightKernel, HeightKernels, KernelId, ThreadGroups, VolumeKernel, VolumeKernels,
};
pub use recording::{DispatchRecord, RecordingBackend};
pub use resources::{
    HeightCell, HeightTexture, PerFrameHeight, RaycastResult, Voxel, VoxelSpace, VoxelTexture,
    HEIGHT_SCALE, MAX_RELATIVE_HEIGHT, UNWRITTEN,
};
pub use uniforms::{HeightUniforms, RaycastUniforms, ScanUniforms};

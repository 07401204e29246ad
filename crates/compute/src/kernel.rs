use glam::UVec3;
use serde::{Deserialize, Serialize};

/// Kernels of the height-field mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeightKernel {
    /// Zero the height map and reset the per-frame scratch buffer.
    Init,
    /// Project depth samples into the per-frame scratch buffer.
    Accumulate,
    /// Blend the scratch buffer into the height map.
    Apply,
}

/// Kernels of the voxel TSDF mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeKernel {
    Clear,
    Scan,
    Raycast,
}

/// Identifies one compute kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelId {
    Height(HeightKernel),
    Volume(VolumeKernel),
}

impl KernelId {
    pub fn name(&self) -> &'static str {
        match self {
            KernelId::Height(HeightKernel::Init) => "Init",
            KernelId::Height(HeightKernel::Accumulate) => "Accumulate",
            KernelId::Height(HeightKernel::Apply) => "Apply",
            KernelId::Volume(VolumeKernel::Clear) => "Clear",
            KernelId::Volume(VolumeKernel::Scan) => "Scan",
            KernelId::Volume(VolumeKernel::Raycast) => "Raycast",
        }
    }
}

impl From<HeightKernel> for KernelId {
    fn from(kernel: HeightKernel) -> Self {
        KernelId::Height(kernel)
    }
}

impl From<VolumeKernel> for KernelId {
    fn from(kernel: VolumeKernel) -> Self {
        KernelId::Volume(kernel)
    }
}

impl std::fmt::Display for KernelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of thread groups in a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadGroups {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl ThreadGroups {
    /// Groups needed to cover `fill` threads, rounding up so no thread is dropped.
    pub fn for_fill(fill: UVec3, group_size: UVec3) -> Self {
        let group_size = group_size.max(UVec3::ONE);
        Self {
            x: fill.x.div_ceil(group_size.x),
            y: fill.y.div_ceil(group_size.y),
            z: fill.z.div_ceil(group_size.z),
        }
    }

    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// A kernel resolved against a backend once at setup time.
///
/// Mappers hold these instead of raw kernel indices; backends reject a handle
/// passed to the wrong entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundKernel {
    id: KernelId,
    group_size: UVec3,
}

impl BoundKernel {
    pub fn new(id: KernelId, group_size: UVec3) -> Self {
        Self { id, group_size }
    }

    pub fn id(&self) -> KernelId {
        self.id
    }

    pub fn group_size(&self) -> UVec3 {
        self.group_size
    }

    pub fn groups_for(&self, fill: UVec3) -> ThreadGroups {
        ThreadGroups::for_fill(fill, self.group_size)
    }
}

/// The three height-field kernels, bound together.
#[derive(Debug, Clone, Copy)]
pub struct HeightKernels {
    pub init: BoundKernel,
    pub accumulate: BoundKernel,
    pub apply: BoundKernel,
}

/// The three volume kernels, bound together.
#[derive(Debug, Clone, Copy)]
pub struct VolumeKernels {
    pub clear: BoundKernel,
    pub scan: BoundKernel,
    pub raycast: BoundKernel,
}

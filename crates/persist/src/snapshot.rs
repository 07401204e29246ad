use envmap_compute::{ComputeBackend, HeightCell, HeightTexture, Voxel, VoxelTexture};
use envmap_kernel::{Environment, Strategy};
use glam::UVec3;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;

/// Captured contents of a height map.
///
/// `hash` is FNV-1a over the little-endian bytes of every field, checked on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightSnapshot {
    pub texture_size: u32,
    pub env_size: f32,
    pub cells: Vec<HeightCell>,
    pub hash: u64,
}

impl HeightSnapshot {
    pub fn capture(texture: &HeightTexture, env_size: f32) -> Self {
        let mut snapshot = Self {
            texture_size: texture.size(),
            env_size,
            cells: texture.cells().to_vec(),
            hash: 0,
        };
        snapshot.hash = snapshot.content_hash();
        snapshot
    }

    pub fn verify(&self) -> bool {
        self.hash == self.content_hash()
    }

    /// Rebuild the texture, failing closed on a hash or shape mismatch.
    pub fn restore(&self) -> Result<HeightTexture, PersistError> {
        if !self.verify() {
            return Err(PersistError::HashMismatch {
                expected: self.hash,
                actual: self.content_hash(),
            });
        }
        HeightTexture::from_cells(self.texture_size, self.cells.clone()).ok_or(
            PersistError::ShapeMismatch {
                expected: self.texture_size as usize * self.texture_size as usize,
                actual: self.cells.len(),
            },
        )
    }

    fn content_hash(&self) -> u64 {
        let mut hash = Fnv1a::new();
        hash.write(&self.texture_size.to_le_bytes());
        hash.write(&self.env_size.to_le_bytes());
        for cell in &self.cells {
            hash.write(&cell.height.to_le_bytes());
            hash.write(&cell.confidence.to_le_bytes());
        }
        hash.finish()
    }
}

/// Captured contents of a voxel volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub dims: [u32; 3],
    pub meters_per_voxel: f32,
    pub voxels: Vec<Voxel>,
    pub hash: u64,
}

impl VolumeSnapshot {
    pub fn capture(volume: &VoxelTexture, meters_per_voxel: f32) -> Self {
        let mut snapshot = Self {
            dims: volume.dims().to_array(),
            meters_per_voxel,
            voxels: volume.voxels().to_vec(),
            hash: 0,
        };
        snapshot.hash = snapshot.content_hash();
        snapshot
    }

    pub fn verify(&self) -> bool {
        self.hash == self.content_hash()
    }

    pub fn restore(&self) -> Result<VoxelTexture, PersistError> {
        if !self.verify() {
            return Err(PersistError::HashMismatch {
                expected: self.hash,
                actual: self.content_hash(),
            });
        }
        let dims = UVec3::from_array(self.dims);
        VoxelTexture::from_voxels(dims, self.voxels.clone()).ok_or(PersistError::ShapeMismatch {
            expected: self.dims.iter().map(|d| *d as usize).product(),
            actual: self.voxels.len(),
        })
    }

    fn content_hash(&self) -> u64 {
        let mut hash = Fnv1a::new();
        for d in self.dims {
            hash.write(&d.to_le_bytes());
        }
        hash.write(&self.meters_per_voxel.to_le_bytes());
        for voxel in &self.voxels {
            hash.write(&voxel.sdf.to_le_bytes());
            hash.write(&voxel.weight.to_le_bytes());
        }
        hash.finish()
    }
}

/// A snapshot of whichever map an environment holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapSnapshot {
    Height(HeightSnapshot),
    Volume(VolumeSnapshot),
}

impl MapSnapshot {
    /// Capture the active map of `env`. `None` if its mapper holds no map.
    pub fn capture<B: ComputeBackend>(env: &Environment<B>) -> Option<Self> {
        if let Some(mapper) = env.height_mapper() {
            let texture = mapper.texture()?;
            let config = mapper.config()?;
            return Some(MapSnapshot::Height(HeightSnapshot::capture(texture, config.env_size)));
        }
        let mapper = env.tsdf_mapper()?;
        let volume = mapper.volume()?;
        let config = mapper.config()?;
        Some(MapSnapshot::Volume(VolumeSnapshot::capture(
            volume,
            config.meters_per_voxel,
        )))
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            MapSnapshot::Height(_) => Strategy::HeightField,
            MapSnapshot::Volume(_) => Strategy::Voxel,
        }
    }

    pub fn verify(&self) -> bool {
        match self {
            MapSnapshot::Height(s) => s.verify(),
            MapSnapshot::Volume(s) => s.verify(),
        }
    }

    /// Load this snapshot into the matching mapper of `env`.
    pub fn restore_into<B: ComputeBackend>(&self, env: &mut Environment<B>) -> Result<(), PersistError> {
        let active = env.strategy();
        match self {
            MapSnapshot::Height(snapshot) => {
                let mapper = env.height_mapper_mut().ok_or(PersistError::StrategyMismatch {
                    snapshot: Strategy::HeightField,
                    active,
                })?;
                mapper
                    .restore(snapshot.restore()?)
                    .map_err(|e| PersistError::Restore(e.to_string()))?;
            }
            MapSnapshot::Volume(snapshot) => {
                let mapper = env.tsdf_mapper_mut().ok_or(PersistError::StrategyMismatch {
                    snapshot: Strategy::Voxel,
                    active,
                })?;
                mapper
                    .restore(snapshot.restore()?)
                    .map_err(|e| PersistError::Restore(e.to_string()))?;
            }
        }
        tracing::info!(strategy = %active, "map restored from snapshot");
        Ok(())
    }
}

/// FNV-1a, 64-bit.
struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

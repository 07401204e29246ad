use envmap_common::{Aabb, Frustum};
use envmap_compute::VoxelSpace;
use glam::{IVec3, UVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Index of a cubic chunk of voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl ChunkCoord {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn as_uvec3(&self) -> UVec3 {
        UVec3::new(self.x, self.y, self.z)
    }
}

impl From<UVec3> for ChunkCoord {
    fn from(v: UVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("chunk size must be positive")]
    ZeroChunkSize,
    #[error("volume dimensions {dims} are not divisible by chunk size {chunk_size}")]
    NotDivisible { dims: UVec3, chunk_size: u32 },
}

/// Partition of a voxel volume into cubic chunks of `chunk_size` voxels.
///
/// Chunk `(cx, cy, cz)` owns voxels `chunk_size * c .. chunk_size * (c + 1)` on each axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGrid {
    space: VoxelSpace,
    chunk_size: u32,
    num_chunks: UVec3,
}

impl ChunkGrid {
    pub fn new(space: VoxelSpace, chunk_size: u32) -> Result<Self, GridError> {
        if chunk_size == 0 {
            return Err(GridError::ZeroChunkSize);
        }
        if space.dims % chunk_size != UVec3::ZERO {
            return Err(GridError::NotDivisible {
                dims: space.dims,
                chunk_size,
            });
        }
        Ok(Self {
            space,
            chunk_size,
            num_chunks: space.dims / chunk_size,
        })
    }

    pub fn space(&self) -> &VoxelSpace {
        &self.space
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> UVec3 {
        self.num_chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.num_chunks.x as usize * self.num_chunks.y as usize * self.num_chunks.z as usize
    }

    /// Every chunk, x outermost and z innermost.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        let n = self.num_chunks;
        (0..n.x).flat_map(move |x| {
            (0..n.y).flat_map(move |y| (0..n.z).map(move |z| ChunkCoord::new(x, y, z)))
        })
    }

    /// Index of the first voxel of `chunk`.
    pub fn voxel_offset(&self, chunk: ChunkCoord) -> UVec3 {
        chunk.as_uvec3() * self.chunk_size
    }

    /// World bounds of the voxels in `chunk`, padded by half a voxel.
    pub fn chunk_bounds(&self, chunk: ChunkCoord) -> Aabb {
        let first = self.voxel_offset(chunk);
        let last = first + UVec3::splat(self.chunk_size - 1);
        let half = Vec3::splat(self.space.meters_per_voxel * 0.5);
        Aabb::new(
            self.space.voxel_to_world(first) - half,
            self.space.voxel_to_world(last) + half,
        )
    }

    /// Chunk holding the voxel nearest to `world`, if it lies inside the volume.
    pub fn chunk_at(&self, world: Vec3) -> Option<ChunkCoord> {
        let voxel: IVec3 = self.space.world_to_voxel(world);
        self.space
            .contains(voxel)
            .then(|| ChunkCoord::from(voxel.as_uvec3() / self.chunk_size))
    }

    /// Chunks whose bounds intersect `frustum`, in traversal order.
    pub fn visible_chunks(&self, frustum: &Frustum) -> Vec<ChunkCoord> {
        let visible: Vec<ChunkCoord> = self
            .chunks()
            .filter(|c| frustum.intersects_aabb(&self.chunk_bounds(*c)))
            .collect();
        tracing::trace!(
            visible = visible.len(),
            total = self.chunk_count(),
            "culled chunks"
        );
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envmap_common::Pose;
    use glam::Mat4;

    fn grid() -> ChunkGrid {
        ChunkGrid::new(VoxelSpace::new(UVec3::splat(32), 0.1), 8).unwrap()
    }

    #[test]
    fn rejects_uneven_partition() {
        let space = VoxelSpace::new(UVec3::new(32, 30, 32), 0.1);
        assert_eq!(
            ChunkGrid::new(space, 8),
            Err(GridError::NotDivisible {
                dims: space.dims,
                chunk_size: 8
            })
        );
        assert_eq!(ChunkGrid::new(space, 0), Err(GridError::ZeroChunkSize));
    }

    #[test]
    fn traversal_order_is_x_y_z() {
        let grid = grid();
        assert_eq!(grid.num_chunks(), UVec3::splat(4));
        let chunks: Vec<_> = grid.chunks().take(5).collect();
        assert_eq!(chunks[0], ChunkCoord::new(0, 0, 0));
        assert_eq!(chunks[1], ChunkCoord::new(0, 0, 1));
        assert_eq!(chunks[4], ChunkCoord::new(0, 1, 0));
        assert_eq!(grid.chunks().count(), grid.chunk_count());
    }

    #[test]
    fn chunk_bounds_tile_the_volume() {
        let grid = grid();
        let first = grid.chunk_bounds(ChunkCoord::new(0, 0, 0));
        let last = grid.chunk_bounds(ChunkCoord::new(3, 3, 3));
        let volume = grid.space().bounds();
        assert!((first.min - volume.min).length() < 1e-5);
        assert!((last.max - volume.max).length() < 1e-5);
        assert!((first.size() - Vec3::splat(0.8)).length() < 1e-5);
    }

    #[test]
    fn chunk_at_maps_world_positions() {
        let grid = grid();
        assert_eq!(grid.chunk_at(Vec3::ZERO), Some(ChunkCoord::new(2, 2, 2)));
        assert_eq!(grid.chunk_at(Vec3::splat(-1.6)), Some(ChunkCoord::new(0, 0, 0)));
        assert_eq!(grid.chunk_at(Vec3::splat(10.0)), None);
    }

    #[test]
    fn frustum_culls_chunks_behind_camera() {
        let grid = grid();
        let pose = Pose::default();
        let projection = Mat4::perspective_rh(60.0_f32.to_radians(), 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(projection * pose.view_matrix())
            .with_far_distance(pose.position, pose.forward(), 5.0);
        let visible = grid.visible_chunks(&frustum);
        assert!(!visible.is_empty());
        assert!(visible.len() < grid.chunk_count());
        // Chunks with z index 3 span z in [0.75, 1.55], entirely behind the camera.
        assert!(visible.iter().all(|c| c.z < 3));
    }
}

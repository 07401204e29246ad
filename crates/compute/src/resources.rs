//! GPU-resident map resources.
//!
//! Mappers own these and hand them to a [`ComputeBackend`](crate::ComputeBackend)
//! per dispatch. Consumers only ever get shared references.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use envmap_common::Aabb;
use glam::{IVec3, UVec3, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Scratch value for a cell that received no sample this frame.
pub const UNWRITTEN: i32 = -32000;

/// Fixed-point scale of scratch heights (millimetres).
pub const HEIGHT_SCALE: f32 = 1000.0;

/// Largest height offset from the frame reference a scratch cell can hold, metres.
pub const MAX_RELATIVE_HEIGHT: f32 = i16::MAX as f32 / HEIGHT_SCALE;

/// One height-map cell: blended surface height and observation confidence.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct HeightCell {
    pub height: f32,
    /// 0 for never observed, approaching 1 with repeated observations.
    pub confidence: f32,
}

/// Square height map covering `env_size` metres centred on the world origin.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightTexture {
    size: u32,
    cells: Vec<HeightCell>,
}

impl HeightTexture {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            cells: vec![HeightCell::default(); size as usize * size as usize],
        }
    }

    /// Rebuild from stored cells. `None` if the cell count does not match `size²`.
    pub fn from_cells(size: u32, cells: Vec<HeightCell>) -> Option<Self> {
        (cells.len() == size as usize * size as usize).then_some(Self { size, cells })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[HeightCell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [HeightCell] {
        &mut self.cells
    }

    pub fn cell(&self, x: u32, z: u32) -> Option<&HeightCell> {
        if x >= self.size || z >= self.size {
            return None;
        }
        self.cells.get((z * self.size + x) as usize)
    }

    /// Cell index covering world `xz` for a map of side `env_size`, if inside.
    pub fn cell_index(&self, xz: Vec2, env_size: f32) -> Option<usize> {
        let uv = xz / env_size + Vec2::splat(0.5);
        if !(0.0..1.0).contains(&uv.x) || !(0.0..1.0).contains(&uv.y) {
            return None;
        }
        let x = ((uv.x * self.size as f32) as u32).min(self.size - 1);
        let z = ((uv.y * self.size as f32) as u32).min(self.size - 1);
        Some((z * self.size + x) as usize)
    }

    pub fn is_zeroed(&self) -> bool {
        self.cells.iter().all(|c| *c == HeightCell::default())
    }

    pub fn clear(&mut self) {
        self.cells.fill(HeightCell::default());
    }
}

/// Per-frame accumulator, [`UNWRITTEN`] when empty.
///
/// Values are millimetres relative to a per-frame reference height (the
/// camera height for local frames), so absolute heights are unbounded while
/// every stored value fits an `i16`.
#[derive(Debug, Clone, PartialEq)]
pub struct PerFrameHeight {
    values: Vec<i32>,
}

impl PerFrameHeight {
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![UNWRITTEN; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    #[cfg(feature = "wgpu")]
    pub(crate) fn values_mut(&mut self) -> &mut [i32] {
        &mut self.values
    }

    /// Encode `height` as millimetres above `reference`.
    ///
    /// `None` when the offset is not finite or falls outside `(UNWRITTEN, i16::MAX]`.
    pub fn encode(height: f32, reference: f32) -> Option<i32> {
        let mm = ((height - reference) * HEIGHT_SCALE).round();
        if !mm.is_finite() || mm <= UNWRITTEN as f32 || mm > i16::MAX as f32 {
            return None;
        }
        Some(mm as i32)
    }

    pub fn decode(value: i32, reference: f32) -> f32 {
        reference + value as f32 / HEIGHT_SCALE
    }

    /// Combine a sample into a cell, keeping the highest surface.
    pub fn write_max(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = (*slot).max(value);
        }
    }

    /// Cells written since the last reset, in index order.
    pub fn written(&self) -> impl Iterator<Item = (usize, i32)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != UNWRITTEN)
            .map(|(i, v)| (i, *v))
    }

    pub fn reset(&mut self) {
        self.values.fill(UNWRITTEN);
    }
}

/// One voxel: truncated signed distance normalized to -1..1 and integration weight.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Voxel {
    pub sdf: f32,
    /// 0 for never observed.
    pub weight: f32,
}

impl Voxel {
    pub fn is_observed(&self) -> bool {
        self.weight > 0.0
    }
}

/// Mapping between voxel indices and world space for a volume centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelSpace {
    pub dims: UVec3,
    pub meters_per_voxel: f32,
}

impl VoxelSpace {
    pub fn new(dims: UVec3, meters_per_voxel: f32) -> Self {
        Self {
            dims,
            meters_per_voxel,
        }
    }

    /// World position of the centre of voxel `index`.
    pub fn voxel_to_world(&self, index: UVec3) -> Vec3 {
        (index.as_ivec3() - self.half_dims()).as_vec3() * self.meters_per_voxel
    }

    /// Nearest voxel to a world position, possibly outside the volume.
    pub fn world_to_voxel(&self, world: Vec3) -> IVec3 {
        (world / self.meters_per_voxel).round().as_ivec3() + self.half_dims()
    }

    pub fn contains(&self, index: IVec3) -> bool {
        index.cmpge(IVec3::ZERO).all() && index.cmplt(self.dims.as_ivec3()).all()
    }

    /// World bounds spanned by the voxel centres, padded by half a voxel.
    pub fn bounds(&self) -> Aabb {
        let half = Vec3::splat(self.meters_per_voxel * 0.5);
        Aabb::new(
            self.voxel_to_world(UVec3::ZERO) - half,
            self.voxel_to_world(self.dims.saturating_sub(UVec3::ONE)) + half,
        )
    }

    fn half_dims(&self) -> IVec3 {
        (self.dims / 2).as_ivec3()
    }
}

/// Dense voxel volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelTexture {
    dims: UVec3,
    voxels: Vec<Voxel>,
}

impl VoxelTexture {
    pub fn new(dims: UVec3) -> Self {
        Self {
            dims,
            voxels: vec![Voxel::default(); (dims.x as usize) * (dims.y as usize) * (dims.z as usize)],
        }
    }

    /// Rebuild from stored voxels. `None` if the voxel count does not match `dims`.
    pub fn from_voxels(dims: UVec3, voxels: Vec<Voxel>) -> Option<Self> {
        let expected = (dims.x as usize) * (dims.y as usize) * (dims.z as usize);
        (voxels.len() == expected).then_some(Self { dims, voxels })
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn voxels_mut(&mut self) -> &mut [Voxel] {
        &mut self.voxels
    }

    pub fn index(&self, at: IVec3) -> Option<usize> {
        if at.cmplt(IVec3::ZERO).any() || at.cmpge(self.dims.as_ivec3()).any() {
            return None;
        }
        let at = at.as_uvec3();
        Some(((at.z * self.dims.y + at.y) * self.dims.x + at.x) as usize)
    }

    pub fn get(&self, at: IVec3) -> Option<&Voxel> {
        self.index(at).map(|i| &self.voxels[i])
    }

    pub fn get_mut(&mut self, at: IVec3) -> Option<&mut Voxel> {
        self.index(at).map(|i| &mut self.voxels[i])
    }

    pub fn observed_count(&self) -> usize {
        self.voxels.iter().filter(|v| v.is_observed()).count()
    }

    pub fn is_zeroed(&self) -> bool {
        self.voxels.iter().all(|v| *v == Voxel::default())
    }

    pub fn clear(&mut self) {
        self.voxels.fill(Voxel::default());
    }
}

/// Single-`u32` buffer for the raycast min-reduction.
#[derive(Debug)]
pub struct RaycastResult {
    value: AtomicU32,
}

impl RaycastResult {
    pub fn new(initial: u32) -> Self {
        Self {
            value: AtomicU32::new(initial),
        }
    }

    /// Atomically keep the smaller of the stored and offered distance.
    pub fn offer(&self, fixed_distance: u32) {
        self.value.fetch_min(fixed_distance, Ordering::Relaxed);
    }

    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_cell_index_covers_centered_square() {
        let tex = HeightTexture::new(10);
        assert_eq!(tex.cell_index(Vec2::ZERO, 10.0), Some(5 * 10 + 5));
        assert_eq!(tex.cell_index(Vec2::new(-4.95, -4.95), 10.0), Some(0));
        assert_eq!(tex.cell_index(Vec2::new(4.95, 4.95), 10.0), Some(99));
        assert_eq!(tex.cell_index(Vec2::new(5.0, 0.0), 10.0), None);
        assert_eq!(tex.cell_index(Vec2::new(0.0, -5.1), 10.0), None);
    }

    #[test]
    fn scratch_encoding_is_millimetres_above_reference() {
        assert_eq!(PerFrameHeight::encode(1.2346, 0.0), Some(1235));
        assert_eq!(PerFrameHeight::encode(-0.5, 0.0), Some(-500));
        assert_eq!(PerFrameHeight::encode(38.5, 40.0), Some(-1500));
        assert!((PerFrameHeight::decode(1235, 0.0) - 1.235).abs() < 1e-6);
        assert!((PerFrameHeight::decode(-1500, 40.0) - 38.5).abs() < 1e-4);
    }

    #[test]
    fn scratch_encoding_rejects_offsets_outside_i16() {
        assert_eq!(PerFrameHeight::encode(40.0, 0.0), None);
        assert_eq!(PerFrameHeight::encode(-40.0, 0.0), None);
        assert_eq!(PerFrameHeight::encode(f32::NAN, 0.0), None);
        assert_eq!(PerFrameHeight::encode(40.0, 39.0), Some(1000));
        assert_eq!(
            PerFrameHeight::encode(MAX_RELATIVE_HEIGHT, 0.0),
            Some(i16::MAX as i32)
        );
    }

    #[test]
    fn scratch_keeps_highest_and_resets() {
        let mut scratch = PerFrameHeight::new(4);
        scratch.write_max(1, -200);
        scratch.write_max(1, 300);
        scratch.write_max(1, 100);
        scratch.write_max(9, 100);
        assert_eq!(scratch.written().collect::<Vec<_>>(), vec![(1, 300)]);
        scratch.reset();
        assert_eq!(scratch.written().count(), 0);
    }

    #[test]
    fn voxel_space_is_centered() {
        let space = VoxelSpace::new(UVec3::splat(8), 0.5);
        assert_eq!(space.voxel_to_world(UVec3::splat(4)), Vec3::ZERO);
        assert_eq!(space.voxel_to_world(UVec3::ZERO), Vec3::splat(-2.0));
        assert_eq!(space.world_to_voxel(Vec3::new(0.4, -0.2, 1.0)), IVec3::new(5, 4, 6));
        assert!(space.contains(IVec3::new(7, 0, 3)));
        assert!(!space.contains(IVec3::new(8, 0, 3)));
        let bounds = space.bounds();
        assert_eq!(bounds.min, Vec3::splat(-2.25));
        assert_eq!(bounds.max, Vec3::splat(1.75));
    }

    #[test]
    fn voxel_texture_indexing() {
        let mut tex = VoxelTexture::new(UVec3::new(2, 3, 4));
        assert_eq!(tex.voxels().len(), 24);
        assert_eq!(tex.index(IVec3::new(1, 2, 3)), Some(23));
        assert_eq!(tex.index(IVec3::new(-1, 0, 0)), None);
        tex.get_mut(IVec3::new(1, 0, 0)).unwrap().weight = 1.0;
        assert_eq!(tex.observed_count(), 1);
        tex.clear();
        assert!(tex.is_zeroed());
    }

    #[test]
    fn raycast_result_keeps_minimum() {
        let result = RaycastResult::new(5000);
        result.offer(2300);
        result.offer(4100);
        assert_eq!(result.load(), 2300);
    }
}

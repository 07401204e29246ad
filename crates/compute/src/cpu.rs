//! Reference implementation of the mapper kernels on the CPU.
//!
//! Each entry point walks the same thread grid the GPU dispatch would, one
//! invocation at a time. Results match the device kernels up to float
//! reassociation.

use envmap_common::DepthFrame;
use glam::{IVec3, UVec3, Vec2, Vec3};

use crate::backend::{expect_kernel, expect_len, ComputeBackend, ComputeError};
use crate::kernel::{BoundKernel, HeightKernel, KernelId, VolumeKernel};
use crate::resources::{
    HeightTexture, PerFrameHeight, RaycastResult, Voxel, VoxelSpace, VoxelTexture,
};
use crate::uniforms::{HeightUniforms, RaycastUniforms, ScanUniforms};

pub const HEIGHT_GROUP_SIZE: UVec3 = UVec3::new(8, 8, 1);
pub const VOLUME_GROUP_SIZE: UVec3 = UVec3::new(4, 4, 4);
pub const RAYCAST_GROUP_SIZE: UVec3 = UVec3::new(64, 1, 1);

/// Thread group size of `kernel` on every backend.
pub(crate) fn group_size(kernel: KernelId) -> UVec3 {
    match kernel {
        KernelId::Height(_) => HEIGHT_GROUP_SIZE,
        KernelId::Volume(VolumeKernel::Raycast) => RAYCAST_GROUP_SIZE,
        KernelId::Volume(_) => VOLUME_GROUP_SIZE,
    }
}

/// Runs every kernel synchronously on the calling thread.
#[derive(Debug, Default)]
pub struct CpuBackend {
    dispatches: u64,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches executed since construction.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }
}

impl ComputeBackend for CpuBackend {
    fn bind(&mut self, kernel: KernelId) -> Result<BoundKernel, ComputeError> {
        let group_size = group_size(kernel);
        tracing::debug!(%kernel, ?group_size, "bound cpu kernel");
        Ok(BoundKernel::new(kernel, group_size))
    }

    fn init_height(
        &mut self,
        kernel: &BoundKernel,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, HeightKernel::Init)?;
        expect_len("per-frame height", map.len(), scratch.len())?;
        self.dispatches += 1;
        map.clear();
        scratch.reset();
        Ok(())
    }

    fn accumulate_height(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &HeightUniforms,
        frame: &DepthFrame,
        map: &HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, HeightKernel::Accumulate)?;
        expect_len("per-frame height", map.len(), scratch.len())?;
        self.dispatches += 1;

        let n = uniforms.depth_samples;
        let reference = uniforms.depth_frame_pos[1];
        let crop = uniforms.frame_crop;
        let span = 1.0 - 2.0 * crop;
        for j in 0..n {
            for i in 0..n {
                let uv = Vec2::splat(crop)
                    + (Vec2::new(i as f32, j as f32) + Vec2::splat(0.5)) / n as f32 * span;
                let Some(point) = height_sample(uniforms, frame, uv) else {
                    continue;
                };
                if on_edge(uniforms, frame, uv, point.y) {
                    continue;
                }
                let Some(value) = PerFrameHeight::encode(point.y, reference) else {
                    continue;
                };
                if let Some(index) = map.cell_index(Vec2::new(point.x, point.z), uniforms.env_size) {
                    scratch.write_max(index, value);
                }
            }
        }
        Ok(())
    }

    fn apply_height(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &HeightUniforms,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, HeightKernel::Apply)?;
        expect_len("per-frame height", map.len(), scratch.len())?;
        self.dispatches += 1;

        let t = uniforms.lerp_height;
        let reference = uniforms.depth_frame_pos[1];
        let cells = map.cells_mut();
        for (index, value) in scratch.written() {
            let cell = &mut cells[index];
            let sample = PerFrameHeight::decode(value, reference);
            cell.height += (sample - cell.height) * t;
            cell.confidence += (1.0 - cell.confidence) * t;
        }
        scratch.reset();
        Ok(())
    }

    fn clear_volume(
        &mut self,
        kernel: &BoundKernel,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, VolumeKernel::Clear)?;
        self.dispatches += 1;
        volume.clear();
        Ok(())
    }

    fn scan_chunk(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &ScanUniforms,
        frame: &DepthFrame,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, VolumeKernel::Scan)?;
        self.dispatches += 1;

        let [ox, oy, oz, chunk] = uniforms.index_offset;
        let offset = UVec3::new(ox, oy, oz);
        let space = VoxelSpace::new(volume.dims(), uniforms.meters_per_voxel);
        for z in 0..chunk {
            for y in 0..chunk {
                for x in 0..chunk {
                    let index = offset + UVec3::new(x, y, z);
                    let Some(voxel) = volume.get_mut(index.as_ivec3()) else {
                        continue;
                    };
                    integrate(voxel, uniforms, frame, space.voxel_to_world(index));
                }
            }
        }
        Ok(())
    }

    fn raycast(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &RaycastUniforms,
        volume: &VoxelTexture,
        result: &RaycastResult,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, VolumeKernel::Raycast)?;
        self.dispatches += 1;

        let mpv = uniforms.meters_per_voxel;
        let space = VoxelSpace::new(volume.dims(), mpv);
        let origin = Vec3::from_slice(&uniforms.origin[..3]);
        let direction = Vec3::from_slice(&uniforms.direction[..3]);
        let lookup = |t: f32| -> Option<Voxel> {
            let at: IVec3 = space.world_to_voxel(origin + direction * t);
            volume.get(at).copied().filter(Voxel::is_observed)
        };

        for step in uniforms.first_step..uniforms.steps {
            let t = step as f32 * mpv;
            let (Some(a), Some(b)) = (lookup(t), lookup(t + mpv)) else {
                continue;
            };
            if a.sdf > 0.0 && b.sdf <= 0.0 {
                let crossing = a.sdf / (a.sdf - b.sdf);
                let distance = (t + crossing * mpv).max(0.0);
                result.offer((distance * uniforms.int_scale).floor() as u32);
            }
        }
        Ok(())
    }

    fn read_back(&mut self, result: &RaycastResult) -> Result<u32, ComputeError> {
        Ok(result.load())
    }
}

/// World point seen through the texel at `uv`.
fn surface_point(frame: &DepthFrame, uv: Vec2) -> Option<(Vec3, f32)> {
    let texel = frame.texel_center(uv)?;
    let depth = frame.sample(texel)?;
    let point = frame.unproject(texel, depth);
    point.is_finite().then_some((point, depth))
}

/// World point of the depth sample at `uv`, if it passes the depth and height range tests.
fn height_sample(uniforms: &HeightUniforms, frame: &DepthFrame, uv: Vec2) -> Option<Vec3> {
    let [near, far] = uniforms.depth_range;
    let (point, depth) = surface_point(frame, uv)?;
    if !(near..=far).contains(&depth) {
        return None;
    }
    let [low, high] = uniforms.height_range;
    let relative = point.y - uniforms.depth_frame_pos[1];
    (low..=high).contains(&relative).then_some(point)
}

/// True when a neighbouring sample differs in height by more than the gradient cutoff.
fn on_edge(uniforms: &HeightUniforms, frame: &DepthFrame, uv: Vec2, height: f32) -> bool {
    let e = uniforms.edge_filter_size;
    if e <= 0.0 {
        return false;
    }
    [Vec2::new(e, 0.0), Vec2::new(-e, 0.0), Vec2::new(0.0, e), Vec2::new(0.0, -e)]
        .into_iter()
        .filter_map(|offset| surface_point(frame, uv + offset))
        .any(|(point, _)| (point.y - height).abs() > uniforms.gradient_cutoff)
}

fn integrate(voxel: &mut Voxel, uniforms: &ScanUniforms, frame: &DepthFrame, world: Vec3) {
    let Some(projected) = frame.project(world) else {
        return;
    };
    if projected.eye_distance > uniforms.max_eye_distance || !projected.in_image() {
        return;
    }
    let Some(depth) = frame.sample(projected.uv) else {
        return;
    };
    let sdf = depth - projected.view_depth;
    if sdf < -uniforms.truncation {
        return;
    }
    let tsdf = (sdf / uniforms.truncation).clamp(-1.0, 1.0);
    let weight = voxel.weight;
    voxel.sdf = (voxel.sdf * weight + tsdf) / (weight + 1.0);
    voxel.weight = (weight + 1.0).min(uniforms.max_weight);
}

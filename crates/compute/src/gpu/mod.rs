//! The mapper kernels on a GPU through wgpu.
//!
//! Map resources stay host-owned: each dispatch uploads the buffers its kernel
//! reads, runs the kernel and copies back what it wrote. Raycast results are the
//! exception, they stay in a staging buffer until [`ComputeBackend::read_back`].

mod pipelines;
mod shaders;

use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use envmap_common::DepthFrame;
use glam::UVec3;
use wgpu::util::DeviceExt;

use crate::backend::{expect_kernel, expect_len, ComputeBackend, ComputeError};
use crate::cpu::group_size;
use crate::kernel::{BoundKernel, HeightKernel, KernelId, VolumeKernel};
use crate::resources::{HeightTexture, PerFrameHeight, RaycastResult, VoxelTexture};
use crate::uniforms::{HeightUniforms, RaycastUniforms, ScanUniforms};

use pipelines::KernelPipelines;

/// Smallest storage buffer handed to a kernel, one voxel or two height cells.
const MIN_STORAGE_BYTES: usize = 16;

/// Camera matrices and image size of a depth frame, as the kernels see them.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct FrameUniforms {
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    inverse_view: [[f32; 4]; 4],
    inverse_projection: [[f32; 4]; 4],
    size: [u32; 4],
}

impl FrameUniforms {
    fn new(frame: &DepthFrame) -> Self {
        Self {
            view: frame.view().to_cols_array_2d(),
            projection: frame.projection().to_cols_array_2d(),
            inverse_view: frame.pose().to_matrix().to_cols_array_2d(),
            inverse_projection: frame.projection().inverse().to_cols_array_2d(),
            size: [frame.width(), frame.height(), 0, 0],
        }
    }
}

/// Resource dimensions, `w` unused.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct Extent {
    size: [u32; 4],
}

impl Extent {
    fn new(size: UVec3) -> Self {
        Self {
            size: [size.x, size.y, size.z, 0],
        }
    }
}

/// Runs the mapper kernels on the first adapter wgpu offers.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: KernelPipelines,
    pending_raycast: Option<wgpu::Buffer>,
    adapter: String,
    dispatches: u64,
}

impl WgpuBackend {
    /// Pick an adapter, open a device and compile every kernel.
    pub fn new() -> Result<Self, ComputeError> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self, ComputeError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ComputeError::NoAdapter)?;
        let info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("envmap_compute_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| ComputeError::DeviceLost(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipelines = KernelPipelines::new(&device);
        if let Some(error) = device.pop_error_scope().await {
            return Err(ComputeError::Shader(error.to_string()));
        }

        tracing::info!(adapter = %info.name, backend = ?info.backend, "wgpu compute backend ready");
        Ok(Self {
            device,
            queue,
            pipelines,
            pending_raycast: None,
            adapter: info.name,
            dispatches: 0,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter
    }

    /// Dispatches submitted since construction.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    fn uniform<T: Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    fn storage<T: Pod>(&self, label: &str, values: &[T]) -> wgpu::Buffer {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let contents = if bytes.len() < MIN_STORAGE_BYTES {
            let mut padded = bytes.to_vec();
            padded.resize(MIN_STORAGE_BYTES, 0);
            Cow::Owned(padded)
        } else {
            Cow::Borrowed(bytes)
        };
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &contents,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        })
    }

    fn staging_for(&self, source: &wgpu::Buffer) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: source.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Run `kernel` over `fill` threads with `buffers` bound in order, then copy
    /// each `(source, staging)` pair in `readback`.
    fn submit(
        &mut self,
        kernel: &BoundKernel,
        fill: UVec3,
        buffers: &[&wgpu::Buffer],
        readback: &[(&wgpu::Buffer, &wgpu::Buffer)],
    ) {
        let pipeline = self.pipelines.get(kernel.id());
        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.id().name()),
            layout: &pipeline.layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.id().name()),
            });
        let groups = kernel.groups_for(fill);
        if groups.total() > 0 {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.id().name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.x, groups.y, groups.z);
        }
        for (source, staging) in readback {
            encoder.copy_buffer_to_buffer(source, 0, staging, 0, source.size());
        }
        self.queue.submit(Some(encoder.finish()));
        self.dispatches += 1;
        tracing::trace!(kernel = %kernel.id(), ?groups, "wgpu dispatch");
    }

    /// Block until `staging` is mapped and copy its leading bytes into `out`.
    fn download<T: Pod>(&self, staging: &wgpu::Buffer, out: &mut [T]) -> Result<(), ComputeError> {
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| ComputeError::DeviceLost("readback was dropped".into()))?
            .map_err(|e| ComputeError::DeviceLost(e.to_string()))?;

        let target: &mut [u8] = bytemuck::cast_slice_mut(out);
        {
            let mapped = slice.get_mapped_range();
            let Some(bytes) = mapped.get(..target.len()) else {
                return Err(ComputeError::ResourceMismatch {
                    resource: "readback",
                    expected: target.len(),
                    actual: mapped.len(),
                });
            };
            target.copy_from_slice(bytes);
        }
        staging.unmap();
        Ok(())
    }
}

impl ComputeBackend for WgpuBackend {
    fn bind(&mut self, kernel: KernelId) -> Result<BoundKernel, ComputeError> {
        let group_size = group_size(kernel);
        tracing::debug!(%kernel, ?group_size, adapter = %self.adapter, "bound wgpu kernel");
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

        let size = map.size();
        let extent = self.uniform("extent", &Extent::new(UVec3::new(size, size, 1)));
        let cells = self.storage("height map", map.cells());
        let values = self.storage("per-frame height", scratch.values());
        let (cells_back, values_back) = (self.staging_for(&cells), self.staging_for(&values));
        self.submit(
            kernel,
            UVec3::new(size, size, 1),
            &[&extent, &cells, &values],
            &[(&cells, &cells_back), (&values, &values_back)],
        );
        self.download(&cells_back, map.cells_mut())?;
        self.download(&values_back, scratch.values_mut())
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

        let params = HeightUniforms {
            tex_size: map.size(),
            ..*uniforms
        };
        let params = self.uniform("height uniforms", &params);
        let camera = self.uniform("depth frame", &FrameUniforms::new(frame));
        let depth = self.storage("depth", frame.samples());
        let values = self.storage("per-frame height", scratch.values());
        let values_back = self.staging_for(&values);
        let n = uniforms.depth_samples;
        self.submit(
            kernel,
            UVec3::new(n, n, 1),
            &[&params, &camera, &depth, &values],
            &[(&values, &values_back)],
        );
        self.download(&values_back, scratch.values_mut())
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

        let size = map.size();
        let params = HeightUniforms {
            tex_size: size,
            ..*uniforms
        };
        let params = self.uniform("height uniforms", &params);
        let cells = self.storage("height map", map.cells());
        let values = self.storage("per-frame height", scratch.values());
        let (cells_back, values_back) = (self.staging_for(&cells), self.staging_for(&values));
        self.submit(
            kernel,
            UVec3::new(size, size, 1),
            &[&params, &cells, &values],
            &[(&cells, &cells_back), (&values, &values_back)],
        );
        self.download(&cells_back, map.cells_mut())?;
        self.download(&values_back, scratch.values_mut())
    }

    fn clear_volume(
        &mut self,
        kernel: &BoundKernel,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, VolumeKernel::Clear)?;

        let extent = self.uniform("extent", &Extent::new(volume.dims()));
        let voxels = self.storage("volume", volume.voxels());
        let voxels_back = self.staging_for(&voxels);
        self.submit(kernel, volume.dims(), &[&extent, &voxels], &[(&voxels, &voxels_back)]);
        self.download(&voxels_back, volume.voxels_mut())
    }

    fn scan_chunk(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &ScanUniforms,
        frame: &DepthFrame,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, VolumeKernel::Scan)?;

        let params = self.uniform("scan uniforms", uniforms);
        let camera = self.uniform("depth frame", &FrameUniforms::new(frame));
        let depth = self.storage("depth", frame.samples());
        let extent = self.uniform("extent", &Extent::new(volume.dims()));
        let voxels = self.storage("volume", volume.voxels());
        let voxels_back = self.staging_for(&voxels);
        let chunk = uniforms.index_offset[3];
        self.submit(
            kernel,
            UVec3::splat(chunk),
            &[&params, &camera, &depth, &extent, &voxels],
            &[(&voxels, &voxels_back)],
        );
        self.download(&voxels_back, volume.voxels_mut())
    }

    fn raycast(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &RaycastUniforms,
        volume: &VoxelTexture,
        result: &RaycastResult,
    ) -> Result<(), ComputeError> {
        expect_kernel(kernel, VolumeKernel::Raycast)?;

        let params = self.uniform("raycast uniforms", uniforms);
        let extent = self.uniform("extent", &Extent::new(volume.dims()));
        let voxels = self.storage("volume", volume.voxels());
        let distance = self.storage("raycast result", &[result.load()]);
        let distance_back = self.staging_for(&distance);
        self.submit(
            kernel,
            UVec3::new(uniforms.thread_count(), 1, 1),
            &[&params, &extent, &voxels, &distance],
            &[(&distance, &distance_back)],
        );
        if self.pending_raycast.replace(distance_back).is_some() {
            tracing::warn!("raycast result replaced before it was read back");
        }
        Ok(())
    }

    fn read_back(&mut self, result: &RaycastResult) -> Result<u32, ComputeError> {
        if let Some(staging) = self.pending_raycast.take() {
            let mut distance = [0u32];
            self.download(&staging, &mut distance)?;
            result.offer(distance[0]);
        }
        Ok(result.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::resources::VoxelSpace;
    use envmap_common::{DepthCamera, Plane, Pose, SyntheticScene};
    use glam::Vec3;

    /// `None` on machines without a usable adapter, so the suite still runs headless.
    fn gpu() -> Option<WgpuBackend> {
        match WgpuBackend::new() {
            Ok(backend) => Some(backend),
            Err(e) => {
                eprintln!("skipping wgpu test: {e}");
                None
            }
        }
    }

    fn height_uniforms(size: u32, camera_y: f32) -> HeightUniforms {
        HeightUniforms {
            tex_size: size,
            depth_samples: 48,
            env_size: 10.0,
            lerp_height: 0.5,
            depth_range: [0.1, 10.0],
            height_range: [-3.0, 0.5],
            frame_crop: 0.05,
            edge_filter_size: 0.02,
            gradient_cutoff: 0.2,
            _pad: 0.0,
            depth_frame_pos: [0.0, camera_y, 0.0, 0.0],
        }
    }

    fn map_floor(backend: &mut impl ComputeBackend) -> HeightTexture {
        let init = backend.bind(HeightKernel::Init.into()).unwrap();
        let accumulate = backend.bind(HeightKernel::Accumulate.into()).unwrap();
        let apply = backend.bind(HeightKernel::Apply.into()).unwrap();

        let scene = SyntheticScene::new().with_plane(Plane::floor(38.5));
        let pose = Pose::looking_at(Vec3::new(0.0, 40.0, 0.0), Vec3::new(0.0, 38.5, -2.0));
        let frame = scene.render(&DepthCamera::default(), pose).unwrap();

        let mut map = HeightTexture::new(64);
        let mut scratch = PerFrameHeight::new(map.len());
        let uniforms = height_uniforms(map.size(), 40.0);
        backend.init_height(&init, &mut map, &mut scratch).unwrap();
        for _ in 0..2 {
            backend
                .accumulate_height(&accumulate, &uniforms, &frame, &map, &mut scratch)
                .unwrap();
            backend.apply_height(&apply, &uniforms, &mut map, &mut scratch).unwrap();
        }
        assert_eq!(scratch.written().count(), 0);
        map
    }

    fn scan_wall(backend: &mut impl ComputeBackend) -> VoxelTexture {
        let clear = backend.bind(VolumeKernel::Clear.into()).unwrap();
        let scan = backend.bind(VolumeKernel::Scan.into()).unwrap();
        let scene = SyntheticScene::new().with_plane(Plane::new(Vec3::Z, Vec3::new(0.0, 0.0, -2.3)));
        let frame = scene.render(&DepthCamera::default(), Pose::default()).unwrap();

        let mut volume = VoxelTexture::new(UVec3::splat(64));
        backend.clear_volume(&clear, &mut volume).unwrap();
        for z in (0..64).step_by(16) {
            for y in (0..64).step_by(16) {
                for x in (0..64).step_by(16) {
                    let uniforms = ScanUniforms {
                        index_offset: [x, y, z, 16],
                        meters_per_voxel: 0.1,
                        max_eye_distance: 5.0,
                        truncation: 0.2,
                        max_weight: 64.0,
                    };
                    backend.scan_chunk(&scan, &uniforms, &frame, &mut volume).unwrap();
                }
            }
        }
        volume
    }

    fn hit_distance(backend: &mut impl ComputeBackend, volume: &VoxelTexture) -> f32 {
        let raycast = backend.bind(VolumeKernel::Raycast.into()).unwrap();
        let uniforms = RaycastUniforms {
            origin: [0.0, 0.0, 0.0, 0.0],
            direction: [0.0, 0.0, -1.0, 0.0],
            meters_per_voxel: 0.1,
            int_scale: 1000.0,
            steps: 50,
            first_step: 0,
        };
        let result = RaycastResult::new(5000);
        backend.raycast(&raycast, &uniforms, volume, &result).unwrap();
        backend.read_back(&result).unwrap() as f32 / 1000.0
    }

    #[test]
    fn height_map_matches_cpu() {
        let Some(mut gpu) = gpu() else {
            return;
        };
        let expected = map_floor(&mut CpuBackend::new());
        let actual = map_floor(&mut gpu);

        let observed = |map: &HeightTexture| map.cells().iter().filter(|c| c.confidence > 0.0).count();
        let (cpu_count, gpu_count) = (observed(&expected), observed(&actual));
        assert!(cpu_count > 0);
        assert!(cpu_count.abs_diff(gpu_count) * 100 <= cpu_count, "{cpu_count} vs {gpu_count}");
        for (a, b) in expected.cells().iter().zip(actual.cells()) {
            if a.confidence > 0.0 && b.confidence > 0.0 {
                assert!((a.height - b.height).abs() < 2e-3, "{a:?} vs {b:?}");
                assert!((a.confidence - b.confidence).abs() < 1e-5);
            }
        }
        assert!(gpu.dispatch_count() >= 5);
    }

    #[test]
    fn scanned_volume_and_raycast_match_cpu() {
        let Some(mut gpu) = gpu() else {
            return;
        };
        let expected = scan_wall(&mut CpuBackend::new());
        let actual = scan_wall(&mut gpu);

        let mut mismatched = 0;
        for (a, b) in expected.voxels().iter().zip(actual.voxels()) {
            if a.weight != b.weight || (a.sdf - b.sdf).abs() > 1e-3 {
                mismatched += 1;
            }
        }
        // Voxels on the image border may project to either side of it.
        assert!(mismatched * 100 <= expected.observed_count(), "{mismatched} voxels differ");

        let cpu_hit = hit_distance(&mut CpuBackend::new(), &expected);
        let gpu_hit = hit_distance(&mut gpu, &actual);
        assert!((gpu_hit - 2.3).abs() < 0.1, "gpu hit at {gpu_hit}");
        assert!((gpu_hit - cpu_hit).abs() < 0.05, "{gpu_hit} vs {cpu_hit}");

        let space = VoxelSpace::new(actual.dims(), 0.1);
        let front = actual.get(space.world_to_voxel(Vec3::new(0.0, 0.0, -1.0))).unwrap();
        assert_eq!(front.sdf, 1.0);
    }

    #[test]
    fn unread_raycast_is_empty_until_dispatched() {
        let Some(mut gpu) = gpu() else {
            return;
        };
        let result = RaycastResult::new(7000);
        assert_eq!(gpu.read_back(&result).unwrap(), 7000);
        assert_eq!(gpu.dispatch_count(), 0);
    }

    #[test]
    fn wrong_kernel_is_rejected() {
        let Some(mut gpu) = gpu() else {
            return;
        };
        let scan = gpu.bind(VolumeKernel::Scan.into()).unwrap();
        let mut volume = VoxelTexture::new(UVec3::splat(4));
        let err = gpu.clear_volume(&scan, &mut volume).unwrap_err();
        assert_eq!(
            err,
            ComputeError::KernelMismatch {
                expected: VolumeKernel::Clear.into(),
                actual: VolumeKernel::Scan.into(),
            }
        );
        assert_eq!(gpu.dispatch_count(), 0);
    }
}

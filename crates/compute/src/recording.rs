use bytemuck::Pod;
use envmap_common::DepthFrame;
use glam::UVec3;

use crate::backend::{ComputeBackend, ComputeError};
use crate::kernel::{BoundKernel, KernelId, ThreadGroups};
use crate::resources::{HeightTexture, PerFrameHeight, RaycastResult, VoxelTexture};
use crate::uniforms::{HeightUniforms, RaycastUniforms, ScanUniforms};

/// One dispatch as seen by a [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub kernel: KernelId,
    pub groups: ThreadGroups,
    /// Raw uniform block, empty for kernels that take none.
    pub uniforms: Vec<u8>,
}

impl DispatchRecord {
    /// Reinterpret the recorded uniform bytes, if they have the size of `T`.
    pub fn uniforms_as<T: Pod>(&self) -> Option<T> {
        (self.uniforms.len() == std::mem::size_of::<T>())
            .then(|| bytemuck::pod_read_unaligned(&self.uniforms))
    }
}

/// Wraps a backend and records every dispatch before forwarding it.
///
/// Dispatches rejected by the inner backend are not recorded.
#[derive(Debug, Default)]
pub struct RecordingBackend<B> {
    inner: B,
    records: Vec<DispatchRecord>,
    fail_readbacks: bool,
}

impl<B: ComputeBackend> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            records: Vec::new(),
            fail_readbacks: false,
        }
    }

    pub fn records(&self) -> &[DispatchRecord] {
        &self.records
    }

    pub fn count(&self, kernel: impl Into<KernelId>) -> usize {
        let kernel = kernel.into();
        self.records.iter().filter(|r| r.kernel == kernel).count()
    }

    /// Recorded uniform blocks of `kernel`, in dispatch order.
    pub fn uniforms_of<T: Pod>(&self, kernel: impl Into<KernelId>) -> Vec<T> {
        let kernel = kernel.into();
        self.records
            .iter()
            .filter(|r| r.kernel == kernel)
            .filter_map(DispatchRecord::uniforms_as)
            .collect()
    }

    pub fn clear_records(&mut self) {
        self.records.clear();
    }

    /// Make every subsequent readback fail as if the device was lost.
    pub fn fail_readbacks(&mut self, fail: bool) {
        self.fail_readbacks = fail;
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    fn record(&mut self, kernel: &BoundKernel, fill: UVec3, uniforms: &[u8]) {
        self.records.push(DispatchRecord {
            kernel: kernel.id(),
            groups: kernel.groups_for(fill),
            uniforms: uniforms.to_vec(),
        });
    }
}

impl<B: ComputeBackend> ComputeBackend for RecordingBackend<B> {
    fn bind(&mut self, kernel: KernelId) -> Result<BoundKernel, ComputeError> {
        self.inner.bind(kernel)
    }

    fn init_height(
        &mut self,
        kernel: &BoundKernel,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        self.inner.init_height(kernel, map, scratch)?;
        self.record(kernel, UVec3::new(map.size(), map.size(), 1), &[]);
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
        self.inner
            .accumulate_height(kernel, uniforms, frame, map, scratch)?;
        let n = uniforms.depth_samples;
        self.record(kernel, UVec3::new(n, n, 1), bytemuck::bytes_of(uniforms));
        Ok(())
    }

    fn apply_height(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &HeightUniforms,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        self.inner.apply_height(kernel, uniforms, map, scratch)?;
        self.record(
            kernel,
            UVec3::new(map.size(), map.size(), 1),
            bytemuck::bytes_of(uniforms),
        );
        Ok(())
    }

    fn clear_volume(
        &mut self,
        kernel: &BoundKernel,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        self.inner.clear_volume(kernel, volume)?;
        self.record(kernel, volume.dims(), &[]);
        Ok(())
    }

    fn scan_chunk(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &ScanUniforms,
        frame: &DepthFrame,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        self.inner.scan_chunk(kernel, uniforms, frame, volume)?;
        self.record(
            kernel,
            UVec3::splat(uniforms.index_offset[3]),
            bytemuck::bytes_of(uniforms),
        );
        Ok(())
    }

    fn raycast(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &RaycastUniforms,
        volume: &VoxelTexture,
        result: &RaycastResult,
    ) -> Result<(), ComputeError> {
        self.inner.raycast(kernel, uniforms, volume, result)?;
        self.record(
            kernel,
            UVec3::new(uniforms.thread_count(), 1, 1),
            bytemuck::bytes_of(uniforms),
        );
        Ok(())
    }

    fn read_back(&mut self, result: &RaycastResult) -> Result<u32, ComputeError> {
        if self.fail_readbacks {
            return Err(ComputeError::DeviceLost("readback failed".into()));
        }
        self.inner.read_back(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::kernel::VolumeKernel;

    #[test]
    fn records_groups_and_uniforms() {
        let mut backend = RecordingBackend::new(CpuBackend::new());
        let scan = backend.bind(VolumeKernel::Scan.into()).unwrap();
        let clear = backend.bind(VolumeKernel::Clear.into()).unwrap();
        let mut volume = VoxelTexture::new(UVec3::splat(16));
        backend.clear_volume(&clear, &mut volume).unwrap();

        let frame = DepthFrame::new(
            2,
            2,
            vec![1.0; 4],
            Default::default(),
            glam::Mat4::perspective_rh(1.2, 1.0, 0.1, 10.0),
        )
        .unwrap();
        let uniforms = ScanUniforms {
            index_offset: [8, 0, 8, 8],
            meters_per_voxel: 0.1,
            max_eye_distance: 5.0,
            truncation: 0.2,
            max_weight: 64.0,
        };
        backend.scan_chunk(&scan, &uniforms, &frame, &mut volume).unwrap();

        assert_eq!(backend.records().len(), 2);
        assert_eq!(backend.records()[0].groups, ThreadGroups { x: 4, y: 4, z: 4 });
        assert!(backend.records()[0].uniforms.is_empty());
        assert_eq!(backend.records()[1].groups, ThreadGroups { x: 2, y: 2, z: 2 });
        assert_eq!(backend.uniforms_of::<ScanUniforms>(VolumeKernel::Scan), vec![uniforms]);
        assert_eq!(backend.count(VolumeKernel::Raycast), 0);
    }

    #[test]
    fn rejected_dispatch_is_not_recorded() {
        let mut backend = RecordingBackend::new(CpuBackend::new());
        let raycast = backend.bind(VolumeKernel::Raycast.into()).unwrap();
        let mut volume = VoxelTexture::new(UVec3::splat(4));
        assert!(backend.clear_volume(&raycast, &mut volume).is_err());
        assert!(backend.records().is_empty());
    }

    #[test]
    fn readback_failure_is_device_lost() {
        let mut backend = RecordingBackend::new(CpuBackend::new());
        let result = RaycastResult::new(7);
        assert_eq!(backend.read_back(&result).unwrap(), 7);
        backend.fail_readbacks(true);
        assert!(matches!(
            backend.read_back(&result),
            Err(ComputeError::DeviceLost(_))
        ));
    }
}

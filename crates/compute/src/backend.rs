use envmap_common::DepthFrame;

use crate::kernel::{BoundKernel, KernelId};
use crate::resources::{HeightTexture, PerFrameHeight, RaycastResult, VoxelTexture};
use crate::uniforms::{HeightUniforms, RaycastUniforms, ScanUniforms};

/// Errors surfaced by a compute backend. None of these are recoverable by retrying.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputeError {
    #[error("kernel {0} is not provided by this backend")]
    UnknownKernel(KernelId),
    #[error("kernel {actual} dispatched where {expected} was expected")]
    KernelMismatch { expected: KernelId, actual: KernelId },
    #[error("resource size mismatch for {resource}: expected {expected}, got {actual}")]
    ResourceMismatch {
        resource: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("no compatible GPU adapter")]
    NoAdapter,
    #[error("kernel failed to compile: {0}")]
    Shader(String),
}

/// Executes the mapper kernels against GPU-resident resources.
///
/// Every entry point takes the [`BoundKernel`] produced by [`ComputeBackend::bind`]
/// for that kernel. Dispatches are executed in submission order.
pub trait ComputeBackend {
    /// Resolve a kernel and report its thread group size.
    fn bind(&mut self, kernel: KernelId) -> Result<BoundKernel, ComputeError>;

    /// Zero the height map and reset the scratch buffer.
    fn init_height(
        &mut self,
        kernel: &BoundKernel,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError>;

    /// Project `depth_samples²` samples of `frame` into `scratch`.
    fn accumulate_height(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &HeightUniforms,
        frame: &DepthFrame,
        map: &HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError>;

    /// Blend written scratch cells into `map`, then reset `scratch`.
    fn apply_height(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &HeightUniforms,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError>;

    fn clear_volume(
        &mut self,
        kernel: &BoundKernel,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError>;

    /// Integrate `frame` into one chunk of `volume`.
    fn scan_chunk(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &ScanUniforms,
        frame: &DepthFrame,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError>;

    /// March a ray through `volume`, min-reducing the fixed-point hit distance into `result`.
    fn raycast(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &RaycastUniforms,
        volume: &VoxelTexture,
        result: &RaycastResult,
    ) -> Result<(), ComputeError>;

    /// Block until prior dispatches finish and read the raycast result back.
    fn read_back(&mut self, result: &RaycastResult) -> Result<u32, ComputeError>;
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Box<B> {
    fn bind(&mut self, kernel: KernelId) -> Result<BoundKernel, ComputeError> {
        (**self).bind(kernel)
    }

    fn init_height(
        &mut self,
        kernel: &BoundKernel,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        (**self).init_height(kernel, map, scratch)
    }

    fn accumulate_height(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &HeightUniforms,
        frame: &DepthFrame,
        map: &HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        (**self).accumulate_height(kernel, uniforms, frame, map, scratch)
    }

    fn apply_height(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &HeightUniforms,
        map: &mut HeightTexture,
        scratch: &mut PerFrameHeight,
    ) -> Result<(), ComputeError> {
        (**self).apply_height(kernel, uniforms, map, scratch)
    }

    fn clear_volume(
        &mut self,
        kernel: &BoundKernel,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        (**self).clear_volume(kernel, volume)
    }

    fn scan_chunk(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &ScanUniforms,
        frame: &DepthFrame,
        volume: &mut VoxelTexture,
    ) -> Result<(), ComputeError> {
        (**self).scan_chunk(kernel, uniforms, frame, volume)
    }

    fn raycast(
        &mut self,
        kernel: &BoundKernel,
        uniforms: &RaycastUniforms,
        volume: &VoxelTexture,
        result: &RaycastResult,
    ) -> Result<(), ComputeError> {
        (**self).raycast(kernel, uniforms, volume, result)
    }

    fn read_back(&mut self, result: &RaycastResult) -> Result<u32, ComputeError> {
        (**self).read_back(result)
    }
}

/// Fail with [`ComputeError::KernelMismatch`] unless `kernel` is `expected`.
pub fn expect_kernel(kernel: &BoundKernel, expected: impl Into<KernelId>) -> Result<(), ComputeError> {
    let expected = expected.into();
    if kernel.id() == expected {
        Ok(())
    } else {
        Err(ComputeError::KernelMismatch {
            expected,
            actual: kernel.id(),
        })
    }
}

/// Fail with [`ComputeError::ResourceMismatch`] unless `actual == expected`.
pub fn expect_len(resource: &'static str, expected: usize, actual: usize) -> Result<(), ComputeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ComputeError::ResourceMismatch {
            resource,
            expected,
            actual,
        })
    }
}

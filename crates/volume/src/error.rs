use envmap_common::ConfigError;
use envmap_compute::ComputeError;
use envmap_stream::GridError;

/// Errors from the voxel TSDF mapper.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("volume mapper used before configure")]
    NotConfigured,
    #[error("invalid volume config: {0}")]
    Config(#[from] ConfigError),
    #[error("chunk grid: {0}")]
    Grid(#[from] GridError),
    #[error("compute backend failed: {0}")]
    Compute(#[from] ComputeError),
    #[error("volume has dimensions {actual:?}, expected {expected:?}")]
    DimensionMismatch { expected: [u32; 3], actual: [u32; 3] },
}

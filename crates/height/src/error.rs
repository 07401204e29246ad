use envmap_common::ConfigError;
use envmap_compute::ComputeError;

/// Errors from the height-field mapper.
#[derive(Debug, thiserror::Error)]
pub enum HeightMapError {
    #[error("height mapper used before configure")]
    NotConfigured,
    #[error("invalid height map config: {0}")]
    Config(#[from] ConfigError),
    #[error("compute backend failed: {0}")]
    Compute(#[from] ComputeError),
    #[error("update targets a {actual}x{actual} map, this map is {expected}x{expected}")]
    TextureSizeMismatch { expected: u32, actual: u32 },
    #[error("update cell {index} is outside a map of {len} cells")]
    CellOutOfRange { index: u32, len: usize },
    #[error("update batch has non-finite reference height {0}")]
    InvalidReference(f32),
    #[error("update cell {index} has out-of-range height {value} mm")]
    InvalidValue { index: u32, value: i16 },
}

use envmap_height::HeightMapError;
use envmap_volume::VolumeError;

use crate::config::Strategy;

/// Errors from the environment service.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("height field: {0}")]
    Height(#[from] HeightMapError),
    #[error("voxel volume: {0}")]
    Volume(#[from] VolumeError),
    #[error("raycasts are not supported by the {0} strategy")]
    RaycastUnsupported(Strategy),
    #[error("surface height queries are not supported by the {0} strategy")]
    SurfaceHeightUnsupported(Strategy),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

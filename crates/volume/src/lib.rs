//! Voxel TSDF environment mapper.
//!
//! Depth frames are integrated into a dense truncated signed distance volume
//! centred on the origin. Integration is chunked and frustum-culled; queries
//! march rays through the volume on the compute backend.
//!
//! # Invariants
//! - A chunk is dispatched only while it lies inside the current frame's frustum.
//! - A voxel's weight never exceeds `max_weight`; weight 0 means unobserved.
//! - Raycasts only report crossings from positive to non-positive distance.

mod config;
mod error;
mod mapper;
pub mod mesh;

pub use config::VolumeConfig;
pub use error::VolumeError;
pub use mapper::{RaycastHit, ScanReport, TsdfMapper, RAYCAST_SCALE};
pub use mesh::{extract_mesh, SurfaceMesh};

//! Shared types for the environment mappers: poses, rays, bounds, frusta and
//! depth frames.
//!
//! # Invariants
//! - World space is right-handed, +Y up, metres.
//! - Depth frames are read-only snapshots owned by the depth source.

mod config;
mod depth;
mod geometry;
mod scene;
mod types;

pub use config::{ensure_positive, ensure_range, ConfigError};
pub use depth::{DepthFrame, DepthFrameError, DepthSource, Projected};
pub use geometry::{Aabb, Frustum};
pub use scene::{DepthCamera, Plane, SyntheticScene};
pub use types::{Pose, Ray};

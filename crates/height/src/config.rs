use envmap_common::{ensure_positive, ensure_range, ConfigError};
use envmap_compute::{HeightUniforms, MAX_RELATIVE_HEIGHT};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Parameters of the height-field mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightMapConfig {
    /// Side of the square height texture, in cells.
    pub texture_size: u32,
    /// Side of the mapped world square, in metres, centred on the origin.
    pub env_size: f32,
    /// Samples per image axis per frame.
    pub depth_samples: u32,
    /// Accepted eye-space depth, metres.
    pub depth_range: [f32; 2],
    /// Fraction of the image trimmed from each border, `[0, 0.5)`.
    pub frame_crop: f32,
    /// Accepted sample height relative to the camera, metres.
    /// Both ends must lie within the scratch encoding's reach of the camera.
    pub height_range: [f32; 2],
    /// Neighbour offset of the edge filter, in uv.
    pub edge_filter_size: f32,
    /// Largest neighbour height difference a sample may have, metres.
    pub gradient_cutoff: f32,
    /// Blend factor per observation, `(0, 1]`.
    pub lerp_height: f32,
}

impl Default for HeightMapConfig {
    fn default() -> Self {
        Self {
            texture_size: 512,
            env_size: 50.0,
            depth_samples: 128,
            depth_range: [0.5, 6.0],
            frame_crop: 0.0,
            height_range: [-3.0, 0.5],
            edge_filter_size: 0.02,
            gradient_cutoff: 0.2,
            lerp_height: 0.2,
        }
    }
}

impl HeightMapConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("texture_size", self.texture_size)?;
        ensure_positive("env_size", self.env_size)?;
        ensure_positive("depth_samples", self.depth_samples)?;
        ensure_positive("gradient_cutoff", self.gradient_cutoff)?;
        ensure_range("depth_range", self.depth_range)?;
        ensure_range("height_range", self.height_range)?;
        for (field, value) in [
            ("height_range.min", self.height_range[0]),
            ("height_range.max", self.height_range[1]),
        ] {
            if value.abs() > MAX_RELATIVE_HEIGHT {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    allowed: "[-32.767, 32.767]",
                });
            }
        }
        if self.depth_range[0] < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "depth_range.min",
                value: self.depth_range[0],
                allowed: "[0, max)",
            });
        }
        if !(self.lerp_height > 0.0 && self.lerp_height <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "lerp_height",
                value: self.lerp_height,
                allowed: "(0, 1]",
            });
        }
        if !(0.0..0.5).contains(&self.frame_crop) {
            return Err(ConfigError::OutOfRange {
                field: "frame_crop",
                value: self.frame_crop,
                allowed: "[0, 0.5)",
            });
        }
        if !(self.edge_filter_size >= 0.0 && self.edge_filter_size < 0.5) {
            return Err(ConfigError::OutOfRange {
                field: "edge_filter_size",
                value: self.edge_filter_size,
                allowed: "[0, 0.5)",
            });
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.texture_size as usize * self.texture_size as usize
    }

    /// World size of one cell, metres.
    pub fn cell_size(&self) -> f32 {
        self.env_size / self.texture_size as f32
    }

    pub(crate) fn uniforms(&self, camera: Vec3) -> HeightUniforms {
        HeightUniforms {
            tex_size: self.texture_size,
            depth_samples: self.depth_samples,
            env_size: self.env_size,
            lerp_height: self.lerp_height,
            depth_range: self.depth_range,
            height_range: self.height_range,
            frame_crop: self.frame_crop,
            edge_filter_size: self.edge_filter_size,
            gradient_cutoff: self.gradient_cutoff,
            _pad: 0.0,
            depth_frame_pos: camera.extend(1.0).to_array(),
        }
    }
}

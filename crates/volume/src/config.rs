use envmap_common::{ensure_positive, ConfigError};
use envmap_compute::VoxelSpace;
use envmap_stream::BudgetConfig;
use glam::UVec3;
use serde::{Deserialize, Serialize};

/// Parameters of the voxel TSDF mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub meters_per_voxel: f32,
    /// Edge length of a scan chunk, in voxels.
    pub chunk_size: u32,
    /// Voxels further than this from the eye are not integrated, metres.
    pub max_eye_distance: f32,
    /// Volume size in voxels, centred on the origin.
    pub dims: [u32; 3],
    /// Signed distances are clamped to ± this many metres.
    pub truncation: f32,
    pub max_weight: f32,
    pub budget: BudgetConfig,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            meters_per_voxel: 0.1,
            chunk_size: 32,
            max_eye_distance: 7.0,
            dims: [128, 64, 128],
            truncation: 0.2,
            max_weight: 64.0,
            budget: BudgetConfig::default(),
        }
    }
}

impl VolumeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("meters_per_voxel", self.meters_per_voxel)?;
        ensure_positive("chunk_size", self.chunk_size)?;
        ensure_positive("max_eye_distance", self.max_eye_distance)?;
        ensure_positive("truncation", self.truncation)?;
        ensure_positive("max_weight", self.max_weight)?;
        for (field, value) in ["dims.x", "dims.y", "dims.z"].into_iter().zip(self.dims) {
            ensure_positive(field, value)?;
        }
        if self.dims.iter().any(|d| d % self.chunk_size != 0) {
            return Err(ConfigError::NotDivisible {
                dims: self.dims,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }

    pub fn dims(&self) -> UVec3 {
        UVec3::from_array(self.dims)
    }

    pub fn space(&self) -> VoxelSpace {
        VoxelSpace::new(self.dims(), self.meters_per_voxel)
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().map(|d| *d as usize).product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = VolumeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.voxel_count(), 128 * 64 * 128);
        assert_eq!(config.budget.interval_ms, 30);
    }

    #[test]
    fn dims_must_divide_into_chunks() {
        let config = VolumeConfig {
            dims: [64, 48, 64],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotDivisible {
                dims: [64, 48, 64],
                chunk_size: 32
            })
        );
    }

    #[test]
    fn rejects_non_positive_values() {
        let zero_voxel = VolumeConfig {
            meters_per_voxel: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            zero_voxel.validate(),
            Err(ConfigError::NotPositive { field: "meters_per_voxel", .. })
        ));
        let zero_dim = VolumeConfig {
            dims: [64, 0, 64],
            ..Default::default()
        };
        assert!(matches!(
            zero_dim.validate(),
            Err(ConfigError::NotPositive { field: "dims.y", .. })
        ));
    }

    #[test]
    fn json_overrides_nested_budget() {
        let config: VolumeConfig =
            serde_json::from_str(r#"{"chunk_size": 8, "budget": {"burst": 4}}"#).unwrap();
        assert_eq!(config.chunk_size, 8);
        assert_eq!(config.budget.burst, 4);
        assert_eq!(config.budget.interval_ms, 30);
        assert_eq!(config.truncation, 0.2);
    }
}

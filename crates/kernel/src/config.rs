use std::path::Path;

use envmap_height::HeightMapConfig;
use envmap_volume::VolumeConfig;
use serde::{Deserialize, Serialize};

use crate::error::EnvironmentError;

/// Which mapper backs an [`Environment`](crate::Environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    HeightField,
    Voxel,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strategy::HeightField => "height_field",
            Strategy::Voxel => "voxel",
        })
    }
}

/// Deployment configuration: the active strategy plus both mappers' parameters.
///
/// Only the section of the active strategy is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub strategy: Strategy,
    pub height: HeightMapConfig,
    pub volume: VolumeConfig,
}

impl EnvironmentConfig {
    pub fn height_field(height: HeightMapConfig) -> Self {
        Self {
            strategy: Strategy::HeightField,
            height,
            ..Default::default()
        }
    }

    pub fn voxel(volume: VolumeConfig) -> Self {
        Self {
            strategy: Strategy::Voxel,
            volume,
            ..Default::default()
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, EnvironmentError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self, EnvironmentError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a `.json` file, or YAML for any other extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EnvironmentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text)?,
            _ => Self::from_yaml(&text)?,
        };
        tracing::debug!(path = %path.display(), strategy = %config.strategy, "loaded environment config");
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, EnvironmentError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_default() {
        let config = EnvironmentConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EnvironmentConfig::default());
        assert_eq!(config.strategy, Strategy::HeightField);
    }

    #[test]
    fn yaml_selects_voxel_strategy() {
        let yaml = "strategy: voxel\nvolume:\n  chunk_size: 16\n  max_eye_distance: 5.0\n";
        let config = EnvironmentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.strategy, Strategy::Voxel);
        assert_eq!(config.volume.chunk_size, 16);
        assert_eq!(config.volume.max_eye_distance, 5.0);
        assert_eq!(config.height, HeightMapConfig::default());
    }

    #[test]
    fn json_and_yaml_agree() {
        let config = EnvironmentConfig::voxel(VolumeConfig {
            dims: [64, 32, 64],
            ..Default::default()
        });
        let yaml = config.to_yaml().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(EnvironmentConfig::from_yaml(&yaml).unwrap(), config);
        assert_eq!(EnvironmentConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        let err = EnvironmentConfig::from_yaml("strategy: mesh\n").unwrap_err();
        assert!(matches!(err, EnvironmentError::Yaml(_)));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("env.json");
        std::fs::write(&json_path, r#"{"strategy": "voxel"}"#).unwrap();
        assert_eq!(EnvironmentConfig::load(&json_path).unwrap().strategy, Strategy::Voxel);

        let yaml_path = dir.path().join("env.yaml");
        std::fs::write(&yaml_path, "height:\n  texture_size: 128\n").unwrap();
        let config = EnvironmentConfig::load(&yaml_path).unwrap();
        assert_eq!(config.strategy, Strategy::HeightField);
        assert_eq!(config.height.texture_size, 128);

        assert!(matches!(
            EnvironmentConfig::load(dir.path().join("missing.yaml")),
            Err(EnvironmentError::Io(_))
        ));
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Streaming configuration: visibility radius, pass cadence, object cap and grid shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Radius (meters) beyond which nothing streams.
    pub visibility_distance: f32,
    /// Minimum spacing (milliseconds) between two periodic passes.
    pub update_interval_ms: u64,
    /// Maximum number of personal + universal objects spawned for one player.
    pub max_objects: usize,
    /// Edge length (meters) of one grid cell on every axis.
    pub cell_size: f32,
    /// Half-extent (meters) of the gridded cube centered at the origin.
    /// Anything outside lives in the fallback world chunk.
    pub grid_half_extent: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            visibility_distance: 200.0,
            update_interval_ms: 200,
            max_objects: 1000,
            cell_size: 100.0,
            grid_half_extent: 3000.0,
        }
    }
}

impl StreamConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn visibility_distance_squared(&self) -> f32 {
        self.visibility_distance * self.visibility_distance
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("visibility_distance", self.visibility_distance),
            ("cell_size", self.cell_size),
            ("grid_half_extent", self.grid_half_extent),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        if !(self.visibility_distance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "visibility_distance must be positive, got {}",
                self.visibility_distance
            )));
        }
        if !(self.cell_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "cell_size must be positive, got {}",
                self.cell_size
            )));
        }
        if !(self.grid_half_extent >= self.cell_size) {
            return Err(ConfigError::Invalid(format!(
                "grid_half_extent ({}) must be at least one cell ({})",
                self.grid_half_extent, self.cell_size
            )));
        }
        // Cell coordinates are i32 on every axis.
        if self.grid_half_extent / self.cell_size > i32::MAX as f32 {
            return Err(ConfigError::Invalid(format!(
                "grid_half_extent ({}) spans too many cells of size {}",
                self.grid_half_extent, self.cell_size
            )));
        }
        if self.max_objects == 0 {
            return Err(ConfigError::Invalid("max_objects must be positive".into()));
        }
        if self.update_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "update_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::GridLayout;
use crate::physics::PhysicsSettings;

/// Where loads read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLoadMode {
    /// The active scope only.
    #[default]
    Default,
    /// The canonical save only, whatever the active scope.
    Readonly,
    /// The active scope, falling back to the canonical save for missing files.
    DefaultElseReadonly,
}

/// Whether saves touch disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSaveMode {
    #[default]
    Default,
    Readonly,
}

/// Folder set that writes go to. `Play` is a scratch copy used while
/// play-testing so the canonical save stays untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveScope {
    #[default]
    Canonical,
    Play,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub save_name: String,
    pub dimension: String,
    pub chunk_size: usize,
    pub chunks_per_region_side: usize,
    /// Width of the square refreshed around an edited tile.
    pub refresh_radius: i32,
    /// Chunks kept loaded around the focus point, per axis.
    pub load_radius: [i32; 2],
    pub autosave_interval_secs: f64,
    pub out_of_bounds_refresh_secs: f64,
    /// Fixed physics steps run by one `World::update` at most. Backlog past
    /// the cap is dropped.
    pub max_physics_steps_per_update: u32,
    pub scope: SaveScope,
    pub load_mode: DataLoadMode,
    pub save_mode: DataSaveMode,
    pub physics: PhysicsSettings,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            save_name: "new_save".to_string(),
            dimension: "overworld".to_string(),
            chunk_size: 16,
            chunks_per_region_side: 4,
            refresh_radius: 3,
            load_radius: [2, 2],
            autosave_interval_secs: 10.0,
            out_of_bounds_refresh_secs: 0.2,
            max_physics_steps_per_update: 5,
            scope: SaveScope::Canonical,
            load_mode: DataLoadMode::Default,
            save_mode: DataSaveMode::Default,
            physics: PhysicsSettings::default(),
        }
    }
}

impl WorldConfig {
    pub fn layout(&self) -> GridLayout {
        GridLayout::new(self.chunk_size, self.chunks_per_region_side)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_folder_name("save_name", &self.save_name)?;
        validate_folder_name("dimension", &self.dimension)?;
        if !(1..=256).contains(&self.chunk_size) {
            return Err(ConfigError::invalid("chunk_size", "must be in 1..=256"));
        }
        if self.chunks_per_region_side == 0 {
            return Err(ConfigError::invalid("chunks_per_region_side", "must be >= 1"));
        }
        if self.refresh_radius < 1 {
            return Err(ConfigError::invalid("refresh_radius", "must be >= 1"));
        }
        if self.load_radius.iter().any(|radius| *radius < 0) {
            return Err(ConfigError::invalid("load_radius", "must be >= 0"));
        }
        if !(self.autosave_interval_secs.is_finite() && self.autosave_interval_secs > 0.0) {
            return Err(ConfigError::invalid("autosave_interval_secs", "must be > 0"));
        }
        if !(self.out_of_bounds_refresh_secs.is_finite() && self.out_of_bounds_refresh_secs > 0.0)
        {
            return Err(ConfigError::invalid("out_of_bounds_refresh_secs", "must be > 0"));
        }
        if self.max_physics_steps_per_update == 0 {
            return Err(ConfigError::invalid("max_physics_steps_per_update", "must be >= 1"));
        }
        self.physics.validate()
    }
}

fn validate_folder_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    if !value.chars().all(allowed) {
        return Err(ConfigError::invalid(
            field,
            format!("'{value}' may only contain ASCII letters, digits, '_' and '-'"),
        ));
    }
    if value == "play" {
        return Err(ConfigError::invalid(field, "'play' is reserved"));
    }
    Ok(())
}

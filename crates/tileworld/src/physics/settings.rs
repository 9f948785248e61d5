use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::math::Vec2;

/// Tunables shared by every body in a [`super::PhysicsWorld`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    pub fixed_dt: f32,
    /// Bias added along the last motion direction so resting contacts are
    /// detected every step. Removed again after the move.
    pub error_handler: f32,
    /// Extra tiles sampled around the swept query bounds.
    pub query_margin: f32,
    pub gravity: Vec2,
    pub fluid_density: f32,
    pub fluid_drag: f32,
    /// Below this many bodies a wave is simulated on the calling thread.
    pub parallel_threshold: usize,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 50.0,
            error_handler: 0.001,
            query_margin: 1.0,
            gravity: Vec2::new(0.0, -30.0),
            fluid_density: 1.0,
            fluid_drag: 2.0,
            parallel_threshold: 64,
        }
    }
}

impl PhysicsSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_dt.is_finite() && self.fixed_dt > 0.0) {
            return Err(ConfigError::invalid("physics.fixed_dt", "must be > 0"));
        }
        if !(self.error_handler.is_finite() && self.error_handler >= 0.0) {
            return Err(ConfigError::invalid("physics.error_handler", "must be >= 0"));
        }
        if !(self.query_margin.is_finite() && self.query_margin >= 0.0) {
            return Err(ConfigError::invalid("physics.query_margin", "must be >= 0"));
        }
        if !self.gravity.is_finite() {
            return Err(ConfigError::invalid("physics.gravity", "must be finite"));
        }
        if !(self.fluid_density.is_finite() && self.fluid_drag.is_finite()) {
            return Err(ConfigError::invalid(
                "physics.fluid_density",
                "fluid density and drag must be finite",
            ));
        }
        Ok(())
    }
}

//! Rating system configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Parameters of the rating delta model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSettings {
    pub initial_rating: f64,
    /// Delta for a win between equally rated players
    pub base_delta: f64,
    /// Per-point adjustment applied to the rating gap
    pub increment_factor: f64,
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            initial_rating: 1500.0,
            base_delta: 20.0,
            increment_factor: 0.025,
        }
    }
}

impl RatingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.initial_rating <= 0.0 {
            return Err(anyhow!("Initial rating must be positive"));
        }
        if self.base_delta <= 0.0 {
            return Err(anyhow!("Rating base delta must be positive"));
        }
        if self.increment_factor < 0.0 {
            return Err(anyhow!("Rating increment factor cannot be negative"));
        }
        Ok(())
    }
}

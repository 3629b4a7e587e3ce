pub mod doctor;
pub mod law;
pub mod pn;
pub mod sampler;
pub mod sweep;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use law::{GuidanceLaw, GuidanceState, Step};
pub use sampler::{ErrorSampler, ErrorVector};
pub use sweep::LinearSweep;

/// Position in the guidance frame (pixels for vision tracking, abstract units
/// for the kinematic demos). Planar guidance keeps `z` at 0.
pub type Position = Vector3<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axes {
    #[default]
    Planar,
    Spatial,
}

impl Axes {
    pub fn count(self) -> usize {
        match self {
            Axes::Planar => 2,
            Axes::Spatial => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Proportional-navigation bearing law.
    #[default]
    Pn,
    /// Fixed-fraction linear interpolation towards the target.
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    /// Applied to the line-of-sight bearing in the x/y plane.
    pub planar: f64,
    /// Applied to the elevation angle (spatial mode only).
    pub vertical: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Self { planar: 1.0, vertical: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceConfig {
    #[serde(default)]
    pub axes: Axes,
    #[serde(default)]
    pub profile: Profile,

    /// Start position, 2 values for planar, 3 for spatial.
    pub start: Vec<f64>,

    #[serde(default)]
    pub gains: Gains,

    /// Per-tick step saturation.
    #[serde(default = "default_min_step")]
    pub min_step: f64,
    #[serde(default = "default_max_step")]
    pub max_step: f64,

    /// Arrival holds when every controlled axis error is below this.
    #[serde(default = "default_tolerance")]
    pub arrival_tolerance: f64,

    /// Fraction advanced per tick by the sweep profile.
    #[serde(default = "default_sweep_fraction")]
    pub sweep_fraction: f64,
}

fn default_min_step() -> f64 { 0.1 }
fn default_max_step() -> f64 { 10.0 }
fn default_tolerance() -> f64 { 1.0 }
fn default_sweep_fraction() -> f64 { 0.1 }

impl GuidanceConfig {
    pub fn new(axes: Axes, start: &[f64]) -> Self {
        Self {
            axes,
            profile: Profile::Pn,
            start: start.to_vec(),
            gains: Gains::default(),
            min_step: default_min_step(),
            max_step: default_max_step(),
            arrival_tolerance: default_tolerance(),
            sweep_fraction: default_sweep_fraction(),
        }
    }

    pub fn start_position(&self) -> Result<Position, GuidanceError> {
        position_from_slice(self.axes, &self.start)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GuidanceError {
    #[error("gain {axis}={value} outside the stable range (0, 1]")]
    Gain { axis: &'static str, value: f64 },
    #[error("step limits invalid: min_step={min} max_step={max}")]
    StepLimits { min: f64, max: f64 },
    #[error("arrival tolerance must be > 0 (got {0})")]
    Tolerance(f64),
    #[error("sweep fraction must be in (0, 1] (got {0})")]
    SweepFraction(f64),
    #[error("position needs {expected} coordinates, got {got}")]
    Dimension { expected: usize, got: usize },
    #[error("position has a non-finite coordinate")]
    NonFinite,
}

/// Builds a position from config/detector coordinates. Planar accepts only two
/// values; spatial accepts two (z = 0) or three.
pub fn position_from_slice(axes: Axes, v: &[f64]) -> Result<Position, GuidanceError> {
    let p = match (axes, v.len()) {
        (Axes::Planar, 2) | (Axes::Spatial, 2) => Position::new(v[0], v[1], 0.0),
        (Axes::Spatial, 3) => Position::new(v[0], v[1], v[2]),
        (a, got) => return Err(GuidanceError::Dimension { expected: a.count(), got }),
    };
    if !p.iter().all(|c| c.is_finite()) {
        return Err(GuidanceError::NonFinite);
    }
    Ok(p)
}

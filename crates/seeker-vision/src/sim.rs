use anyhow::Result;
use async_trait::async_trait;
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{Detector, TargetObservation};

/// Confidence reported on dropout frames, below any sane threshold.
const DROPOUT_CONF: f32 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Centre of the target's orbit, pixels.
    pub center: [f64; 2],
    #[serde(default)]
    pub radius: f64,
    /// Orbit advance per observation, radians.
    #[serde(default)]
    pub angular_step: f64,
    /// Uniform jitter added to each axis, pixels.
    #[serde(default)]
    pub noise_px: f64,
    /// Probability that a frame only yields a weak detection.
    #[serde(default)]
    pub dropout: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    pub seed: Option<u64>,
}

fn default_confidence() -> f32 { 0.9 }

impl SimConfig {
    pub fn stationary(x: f64, y: f64) -> Self {
        Self {
            center: [x, y],
            radius: 0.0,
            angular_step: 0.0,
            noise_px: 0.0,
            dropout: 0.0,
            confidence: default_confidence(),
            seed: Some(0),
        }
    }
}

/// Synthetic detector: a target orbiting a point, with jitter and dropouts.
pub struct SimulatedDetector {
    cfg: SimConfig,
    phase: f64,
    rng: StdRng,
}

impl SimulatedDetector {
    pub fn new(cfg: SimConfig) -> Result<Self> {
        anyhow::ensure!(
            cfg.center.iter().all(|c| c.is_finite())
                && cfg.radius.is_finite()
                && cfg.angular_step.is_finite()
                && cfg.noise_px.is_finite(),
            "sim.center, sim.radius, sim.angular_step and sim.noise_px must be finite"
        );
        anyhow::ensure!((0.0..=1.0).contains(&cfg.dropout), "sim.dropout must be in [0, 1]");
        anyhow::ensure!(cfg.noise_px >= 0.0 && cfg.radius >= 0.0, "sim.noise_px and sim.radius must be >= 0");
        anyhow::ensure!((0.0..=1.0).contains(&cfg.confidence), "sim.confidence must be in [0, 1]");
        let rng = match cfg.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self { cfg, phase: 0.0, rng })
    }

    fn jitter(&mut self) -> f64 {
        let n = self.cfg.noise_px;
        if n > 0.0 { self.rng.gen_range(-n..=n) } else { 0.0 }
    }
}

#[async_trait]
impl Detector for SimulatedDetector {
    async fn observe(&mut self) -> Result<Option<TargetObservation>> {
        let c = self.cfg.center;
        let x = c[0] + self.cfg.radius * self.phase.cos() + self.jitter();
        let y = c[1] + self.cfg.radius * self.phase.sin() + self.jitter();
        self.phase += self.cfg.angular_step;

        let conf = if self.rng.gen_bool(self.cfg.dropout) { DROPOUT_CONF } else { self.cfg.confidence };
        Ok(Some(TargetObservation::new(Vector2::new(x, y), conf)))
    }
}

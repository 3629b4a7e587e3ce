pub mod replay;
pub mod sim;

use anyhow::Result;
use async_trait::async_trait;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use replay::ReplayDetector;
pub use sim::{SimConfig, SimulatedDetector};

/// Detector output in pixel coordinates of the captured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub class_id: i32,
    pub conf: f32,
    pub cx: f32,
    pub cy: f32,
    #[serde(default)]
    pub w: f32,
    #[serde(default)]
    pub h: f32,
}

impl Detection {
    /// From a corner box (`start`, `end`), as SSD-style detectors report them.
    pub fn from_corners(class_id: i32, conf: f32, x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            class_id,
            conf,
            cx: (x0 + x1) / 2.0,
            cy: (y0 + y1) / 2.0,
            w: (x1 - x0).abs(),
            h: (y1 - y0).abs(),
        }
    }

    pub fn clamp_to(self, frame_w: u32, frame_h: u32) -> Self {
        Self {
            cx: self.cx.clamp(0.0, frame_w as f32),
            cy: self.cy.clamp(0.0, frame_h as f32),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetObservation {
    pub position: Vector2<f64>,
    /// 0..=1
    pub confidence: f32,
    pub timestamp: OffsetDateTime,
}

impl TargetObservation {
    pub fn new(position: Vector2<f64>, confidence: f32) -> Self {
        Self { position, confidence, timestamp: OffsetDateTime::now_utc() }
    }

    /// Strictly above the threshold; anything at or below means "no target".
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence > threshold
    }
}

/// Highest-confidence detection as an observation, whatever its confidence.
pub fn best_observation(dets: &[Detection]) -> Option<TargetObservation> {
    dets.iter()
        .filter(|d| d.conf.is_finite() && d.cx.is_finite() && d.cy.is_finite())
        .max_by(|a, b| a.conf.partial_cmp(&b.conf).unwrap_or(std::cmp::Ordering::Equal))
        .map(|d| TargetObservation::new(Vector2::new(d.cx as f64, d.cy as f64), d.conf.clamp(0.0, 1.0)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Observations at or below this confidence are ignored.
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,

    /// Captured frame size; detections are clamped to it.
    #[serde(default = "default_frame_w")]
    pub frame_w: u32,
    #[serde(default = "default_frame_h")]
    pub frame_h: u32,

    /// Network input resolution, handed to the detector backend.
    #[serde(default = "default_input")]
    pub input_w: u32,
    #[serde(default = "default_input")]
    pub input_h: u32,

    /// Per-tick wait for a detector result before the last observation is reused.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_conf_threshold() -> f32 { 0.5 }
fn default_frame_w() -> u32 { 640 }
fn default_frame_h() -> u32 { 480 }
fn default_input() -> u32 { 300 }
fn default_timeout_ms() -> u64 { 50 }

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            conf_threshold: default_conf_threshold(),
            frame_w: default_frame_w(),
            frame_h: default_frame_h(),
            input_w: default_input(),
            input_h: default_input(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

pub fn check_vision(cfg: &VisionConfig) -> Result<()> {
    anyhow::ensure!(
        (0.0..1.0).contains(&cfg.conf_threshold),
        "vision.conf_threshold must be in [0, 1)"
    );
    anyhow::ensure!(cfg.frame_w > 0 && cfg.frame_h > 0, "vision frame size must be non-zero");
    anyhow::ensure!(cfg.input_w > 0 && cfg.input_h > 0, "vision input size must be non-zero");
    anyhow::ensure!(cfg.timeout_ms > 0, "vision.timeout_ms must be > 0");
    Ok(())
}

/// Source of target observations, polled once per control tick.
#[async_trait]
pub trait Detector: Send {
    /// Best observation for the next frame, or `None` when nothing was seen.
    async fn observe(&mut self) -> Result<Option<TargetObservation>>;
}

#[async_trait]
impl<D: Detector + ?Sized> Detector for Box<D> {
    async fn observe(&mut self) -> Result<Option<TargetObservation>> {
        (**self).observe().await
    }
}

/// A stationary target that is always visible.
#[derive(Debug, Clone)]
pub struct FixedTarget {
    position: Vector2<f64>,
}

impl FixedTarget {
    pub fn new(position: Vector2<f64>) -> Self {
        Self { position }
    }
}

#[async_trait]
impl Detector for FixedTarget {
    async fn observe(&mut self) -> Result<Option<TargetObservation>> {
        Ok(Some(TargetObservation::new(self.position, 1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(conf: f32, cx: f32, cy: f32) -> Detection {
        Detection { class_id: 0, conf, cx, cy, w: 10.0, h: 10.0 }
    }

    #[test]
    fn picks_highest_confidence() {
        let obs = best_observation(&[det(0.6, 1.0, 1.0), det(0.9, 200.0, 100.0), det(0.3, 5.0, 5.0)]).unwrap();
        assert_eq!(obs.position, Vector2::new(200.0, 100.0));
        assert_eq!(obs.confidence, 0.9);
    }

    #[test]
    fn empty_frame_has_no_observation() {
        assert!(best_observation(&[]).is_none());
        assert!(best_observation(&[det(f32::NAN, 1.0, 1.0)]).is_none());
    }

    #[test]
    fn threshold_is_strict() {
        let obs = TargetObservation::new(Vector2::new(0.0, 0.0), 0.5);
        assert!(!obs.is_confident(0.5));
        assert!(obs.is_confident(0.49));
    }

    #[test]
    fn box_corners_give_centre() {
        let d = Detection::from_corners(0, 0.8, 100.0, 40.0, 200.0, 140.0);
        assert_eq!((d.cx, d.cy, d.w, d.h), (150.0, 90.0, 100.0, 100.0));
        let d = d.clamp_to(120, 80);
        assert_eq!((d.cx, d.cy), (120.0, 80.0));
    }

    #[test]
    fn config_validation() {
        assert!(check_vision(&VisionConfig::default()).is_ok());
        let bad = VisionConfig { conf_threshold: 1.0, ..VisionConfig::default() };
        assert!(check_vision(&bad).is_err());
        let bad = VisionConfig { timeout_ms: 0, ..VisionConfig::default() };
        assert!(check_vision(&bad).is_err());
    }

    #[tokio::test]
    async fn fixed_target_is_always_seen() {
        let mut d = FixedTarget::new(Vector2::new(100.0, 50.0));
        let obs = d.observe().await.unwrap().unwrap();
        assert_eq!(obs.position, Vector2::new(100.0, 50.0));
        assert!(obs.is_confident(0.5));
    }
}

use serde::Deserialize;

use crate::ControlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LostPolicy {
    /// Re-emit the previous frame.
    #[default]
    Hold,
    /// Emit the centre command on every channel.
    Neutral,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    /// Fixed tick period.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Stop once the arrival predicate holds. When false the loop keeps
    /// emitting the arrived position until cancelled.
    #[serde(default = "default_true")]
    pub terminate_on_arrival: bool,

    #[serde(default)]
    pub on_lost: LostPolicy,

    /// Extra write attempts before the actuator is declared unavailable.
    #[serde(default)]
    pub write_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Stop after this many ticks.
    pub max_ticks: Option<u64>,

    /// Depth of the target for spatial guidance; observations are 2D.
    #[serde(default)]
    pub target_z: f64,
}

fn default_period_ms() -> u64 { 100 }

/// One hour.
pub const MAX_PERIOD_MS: u64 = 3_600_000;
fn default_true() -> bool { true }
fn default_retry_backoff_ms() -> u64 { 10 }

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            terminate_on_arrival: true,
            on_lost: LostPolicy::default(),
            write_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            max_ticks: None,
            target_z: 0.0,
        }
    }
}

pub fn check_loop(cfg: &LoopConfig) -> Result<(), ControlError> {
    if cfg.period_ms == 0 || cfg.period_ms > MAX_PERIOD_MS {
        return Err(ControlError::Configuration(format!("loop.period_ms must be in 1..={}", MAX_PERIOD_MS)));
    }
    if cfg.write_retries > 10 {
        return Err(ControlError::Configuration("loop.write_retries must be <= 10".into()));
    }
    if cfg.max_ticks == Some(0) {
        return Err(ControlError::Configuration("loop.max_ticks must be > 0".into()));
    }
    if !cfg.target_z.is_finite() {
        return Err(ControlError::Configuration("loop.target_z must be finite".into()));
    }
    Ok(())
}

use seeker_fc::TransportError;
use seeker_guide::GuidanceError;
use seeker_proto::EncodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// No usable observation this tick. Absorbed: the loop holds.
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("actuator unavailable: {0}")]
    ActuatorUnavailable(#[from] TransportError),

    /// Zero-distance or non-finite guidance. Absorbed as a zero-delta tick.
    #[error("degenerate guidance: {0}")]
    DegenerateGuidance(String),

    #[error("configuration: {0}")]
    Configuration(String),
}

impl ControlError {
    /// Fatal errors end the loop and reach the caller; the rest are absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControlError::ActuatorUnavailable(_) | ControlError::Configuration(_))
    }
}

impl From<GuidanceError> for ControlError {
    fn from(e: GuidanceError) -> Self {
        ControlError::Configuration(format!("guidance: {}", e))
    }
}

impl From<EncodeError> for ControlError {
    fn from(e: EncodeError) -> Self {
        ControlError::Configuration(format!("output: {}", e))
    }
}

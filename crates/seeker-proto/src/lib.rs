pub mod command;
pub mod frame;
pub mod telemetry;

pub use command::{ActuatorCommand, AxisMap, AxisRange, CommandMapper, SourceAxis};
pub use frame::{DutyCycle, FrameEncoder, FrameFormat, PulseWidth, SbusFrame, WireFrame};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("{format} frame needs {expected} commands, got {got}")]
    ChannelCount { format: &'static str, expected: usize, got: usize },
    #[error("invalid range [{min}, {max}]")]
    Range { min: f64, max: f64 },
    #[error("channel {0} mapped more than once")]
    DuplicateChannel(u8),
    #[error("no axes mapped to actuator channels")]
    NoAxes,
    #[error("pwm frequency must be > 0 (got {0})")]
    Frequency(f64),
    #[error("pulse width {pulse_us}us does not fit a {period_us}us pwm period")]
    PulseExceedsPeriod { pulse_us: u32, period_us: f64 },
}

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::command::{degrees_to_duty, radians_to_sbus, to_pulse_us, to_servo_degrees, ActuatorCommand};
use crate::EncodeError;

pub const SBUS_HEADER: u8 = 0x0F;
pub const SBUS_FLAGS: u8 = 0x00;
pub const SBUS_FOOTER: u8 = 0x00;
pub const SBUS_FRAME_LEN: usize = 7;
pub const SBUS_CHANNEL_MASK: u16 = 0x07FF;

/// Minimal two-channel frame:
/// `[0x0F, 0x00, roll_lo, roll_hi, pitch_lo, pitch_hi, 0x00]`, each channel
/// masked to 11 bits. This is not a 25-byte receiver-compatible SBUS packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SbusFrame(pub [u8; SBUS_FRAME_LEN]);

impl SbusFrame {
    pub fn new(roll: u16, pitch: u16) -> Self {
        let r = roll & SBUS_CHANNEL_MASK;
        let p = pitch & SBUS_CHANNEL_MASK;
        Self([
            SBUS_HEADER,
            SBUS_FLAGS,
            (r & 0xFF) as u8,
            (r >> 8) as u8,
            (p & 0xFF) as u8,
            (p >> 8) as u8,
            SBUS_FOOTER,
        ])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// (roll, pitch) as carried on the wire.
    pub fn channels(&self) -> (u16, u16) {
        let b = &self.0;
        (u16::from_le_bytes([b[2], b[3]]), u16::from_le_bytes([b[4], b[5]]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DutyCycle {
    pub channel: u8,
    /// 0..=100
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PulseWidth {
    pub channel: u8,
    pub micros: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Sbus(SbusFrame),
    /// Duty cycles to apply; with `hold` set the output is driven for that
    /// long and then stopped (pulse, then idle).
    Pwm { duties: Vec<DutyCycle>, hold: Option<Duration> },
    /// Servo pulse widths for a pin-control daemon.
    Pulse(Vec<PulseWidth>),
}

impl WireFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            WireFrame::Sbus(_) => "sbus",
            WireFrame::Pwm { .. } => "pwm",
            WireFrame::Pulse(_) => "pulse",
        }
    }
}

impl fmt::Display for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFrame::Sbus(s) => write!(f, "sbus {}", hex::encode(s.as_bytes())),
            WireFrame::Pwm { duties, hold } => {
                write!(f, "pwm")?;
                for d in duties {
                    write!(f, " ch{}={:.2}%", d.channel, d.percent)?;
                }
                match hold {
                    Some(h) => write!(f, " hold={}ms", h.as_millis()),
                    None => write!(f, " continuous"),
                }
            }
            WireFrame::Pulse(pulses) => {
                write!(f, "pulse")?;
                for p in pulses {
                    write!(f, " gpio{}={}us", p.channel, p.micros)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameFormat {
    Sbus { min: u16, max: u16 },
    Pwm { freq_hz: f64, pulse_min_us: u32, pulse_max_us: u32, hold: Option<Duration> },
    Pulse { min_us: u32, max_us: u32 },
}

impl FrameFormat {
    pub fn sbus() -> Self {
        FrameFormat::Sbus { min: 1000, max: 2000 }
    }

    /// 50 Hz, 1000..2000us, held for one second per command.
    pub fn pwm() -> Self {
        FrameFormat::Pwm {
            freq_hz: 50.0,
            pulse_min_us: 1000,
            pulse_max_us: 2000,
            hold: Some(Duration::from_secs(1)),
        }
    }

    pub fn pulse() -> Self {
        FrameFormat::Pulse { min_us: 1000, max_us: 2000 }
    }
}

#[derive(Debug, Clone)]
pub struct FrameEncoder {
    format: FrameFormat,
}

impl FrameEncoder {
    pub fn new(format: FrameFormat) -> Result<Self, EncodeError> {
        match &format {
            FrameFormat::Sbus { min, max } => {
                if !(min < max && *max <= SBUS_CHANNEL_MASK) {
                    return Err(EncodeError::Range { min: *min as f64, max: *max as f64 });
                }
            }
            FrameFormat::Pwm { freq_hz, pulse_min_us, pulse_max_us, .. } => {
                if !(*freq_hz > 0.0 && freq_hz.is_finite()) {
                    return Err(EncodeError::Frequency(*freq_hz));
                }
                if pulse_min_us >= pulse_max_us {
                    return Err(EncodeError::Range { min: *pulse_min_us as f64, max: *pulse_max_us as f64 });
                }
                let period_us = 1_000_000.0 / freq_hz;
                if *pulse_max_us as f64 > period_us {
                    return Err(EncodeError::PulseExceedsPeriod { pulse_us: *pulse_max_us, period_us });
                }
            }
            FrameFormat::Pulse { min_us, max_us } => {
                if min_us >= max_us {
                    return Err(EncodeError::Range { min: *min_us as f64, max: *max_us as f64 });
                }
            }
        }
        Ok(Self { format })
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    /// Number of commands a frame must carry, if fixed.
    pub fn expected_channels(&self) -> Option<usize> {
        match self.format {
            FrameFormat::Sbus { .. } => Some(2),
            _ => None,
        }
    }

    pub fn encode(&self, commands: &[ActuatorCommand]) -> Result<WireFrame, EncodeError> {
        match &self.format {
            FrameFormat::Sbus { min, max } => {
                let [roll, pitch] = commands else {
                    return Err(EncodeError::ChannelCount { format: "sbus", expected: 2, got: commands.len() });
                };
                let to_sbus = |c: &ActuatorCommand| radians_to_sbus(c.value * std::f64::consts::PI, *min, *max);
                Ok(WireFrame::Sbus(SbusFrame::new(to_sbus(roll), to_sbus(pitch))))
            }
            FrameFormat::Pwm { freq_hz, pulse_min_us, pulse_max_us, hold } => {
                if commands.is_empty() {
                    return Err(EncodeError::ChannelCount { format: "pwm", expected: 1, got: 0 });
                }
                let duties = commands
                    .iter()
                    .map(|c| DutyCycle {
                        channel: c.channel,
                        percent: degrees_to_duty(to_servo_degrees(c.value), *pulse_min_us, *pulse_max_us, *freq_hz),
                    })
                    .collect();
                Ok(WireFrame::Pwm { duties, hold: *hold })
            }
            FrameFormat::Pulse { min_us, max_us } => {
                if commands.is_empty() {
                    return Err(EncodeError::ChannelCount { format: "pulse", expected: 1, got: 0 });
                }
                Ok(WireFrame::Pulse(
                    commands
                        .iter()
                        .map(|c| PulseWidth { channel: c.channel, micros: to_pulse_us(c.value, *min_us, *max_us) })
                        .collect(),
                ))
            }
        }
    }
}

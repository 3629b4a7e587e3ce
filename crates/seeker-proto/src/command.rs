use std::f64::consts::PI;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::EncodeError;

/// One actuator channel's command, normalized to `[-1, 1]` (0 is centre).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub channel: u8,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Result<Self, EncodeError> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(EncodeError::Range { min, max });
        }
        Ok(Self { min, max })
    }

    /// Linear scale into `[-1, 1]`, clamped. Non-finite input reads as centre.
    pub fn normalize(&self, v: f64) -> f64 {
        if !v.is_finite() {
            return 0.0;
        }
        let n = (v - self.min) / (self.max - self.min) * 2.0 - 1.0;
        n.clamp(-1.0, 1.0)
    }

    pub fn denormalize(&self, n: f64) -> f64 {
        (n.clamp(-1.0, 1.0) + 1.0) / 2.0 * (self.max - self.min) + self.min
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceAxis {
    X,
    Y,
    Z,
}

impl SourceAxis {
    fn index(self) -> usize {
        match self {
            SourceAxis::X => 0,
            SourceAxis::Y => 1,
            SourceAxis::Z => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisMap {
    pub channel: u8,
    pub source: SourceAxis,
    /// Guidance-frame interval mapped onto the full actuator travel.
    pub range: [f64; 2],
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Clone)]
struct Mapping {
    channel: u8,
    source: SourceAxis,
    range: AxisRange,
    invert: bool,
}

/// Guidance position -> per-channel normalized commands, ordered by channel.
#[derive(Debug, Clone)]
pub struct CommandMapper {
    maps: Vec<Mapping>,
}

impl CommandMapper {
    pub fn new(axes: &[AxisMap]) -> Result<Self, EncodeError> {
        if axes.is_empty() {
            return Err(EncodeError::NoAxes);
        }
        let mut maps = Vec::with_capacity(axes.len());
        for a in axes {
            if maps.iter().any(|m: &Mapping| m.channel == a.channel) {
                return Err(EncodeError::DuplicateChannel(a.channel));
            }
            maps.push(Mapping {
                channel: a.channel,
                source: a.source,
                range: AxisRange::new(a.range[0], a.range[1])?,
                invert: a.invert,
            });
        }
        maps.sort_by_key(|m| m.channel);
        Ok(Self { maps })
    }

    pub fn channels(&self) -> usize {
        self.maps.len()
    }

    pub fn map(&self, position: &Vector3<f64>) -> Vec<ActuatorCommand> {
        self.maps
            .iter()
            .map(|m| {
                let n = m.range.normalize(position[m.source.index()]);
                ActuatorCommand { channel: m.channel, value: if m.invert { -n } else { n } }
            })
            .collect()
    }

    /// Centre command on every channel.
    pub fn neutral(&self) -> Vec<ActuatorCommand> {
        self.maps.iter().map(|m| ActuatorCommand { channel: m.channel, value: 0.0 }).collect()
    }
}

/// Normalized command -> servo angle in `[0, 180]` degrees.
pub fn to_servo_degrees(n: f64) -> f64 {
    (n.clamp(-1.0, 1.0) + 1.0) / 2.0 * 180.0
}

/// Servo angle -> PWM duty cycle percent for a pulse range at `freq_hz`.
pub fn degrees_to_duty(degrees: f64, pulse_min_us: u32, pulse_max_us: u32, freq_hz: f64) -> f64 {
    let deg = degrees.clamp(0.0, 180.0);
    let pulse_us = pulse_min_us as f64 + deg / 180.0 * (pulse_max_us as f64 - pulse_min_us as f64);
    let period_us = 1_000_000.0 / freq_hz;
    (pulse_us / period_us * 100.0).clamp(0.0, 100.0)
}

/// Normalized command -> servo pulse width in whole microseconds.
pub fn to_pulse_us(n: f64, min_us: u32, max_us: u32) -> u32 {
    let span = max_us as f64 - min_us as f64;
    (min_us as f64 + (n.clamp(-1.0, 1.0) + 1.0) / 2.0 * span).round() as u32
}

/// Signed angle -> SBUS-style integer in `[lo, hi]`. Angles outside
/// `[-pi, pi]` clamp to the ends, they never wrap.
pub fn radians_to_sbus(angle: f64, lo: u16, hi: u16) -> u16 {
    let a = if angle.is_finite() { angle.clamp(-PI, PI) } else { 0.0 };
    let v = (a + PI) / (2.0 * PI) * (hi as f64 - lo as f64) + lo as f64;
    v.trunc().clamp(lo as f64, hi as f64) as u16
}

pub fn sbus_to_radians(value: u16, lo: u16, hi: u16) -> f64 {
    (value as f64 - lo as f64) / (hi as f64 - lo as f64) * 2.0 * PI - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mapper() -> CommandMapper {
        CommandMapper::new(&[
            AxisMap { channel: 1, source: SourceAxis::Y, range: [0.0, 480.0], invert: false },
            AxisMap { channel: 0, source: SourceAxis::X, range: [0.0, 640.0], invert: false },
        ])
        .unwrap()
    }

    #[test]
    fn maps_in_channel_order() {
        let cmds = mapper().map(&Vector3::new(320.0, 480.0, 0.0));
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], ActuatorCommand { channel: 0, value: 0.0 });
        assert_eq!(cmds[1], ActuatorCommand { channel: 1, value: 1.0 });
    }

    #[test]
    fn out_of_range_positions_clamp() {
        let cmds = mapper().map(&Vector3::new(-5000.0, 99999.0, 0.0));
        assert_eq!(cmds[0].value, -1.0);
        assert_eq!(cmds[1].value, 1.0);
    }

    #[test]
    fn invert_flips_the_sign() {
        let m = CommandMapper::new(&[AxisMap { channel: 3, source: SourceAxis::X, range: [0.0, 10.0], invert: true }]).unwrap();
        assert_relative_eq!(m.map(&Vector3::new(7.5, 0.0, 0.0))[0].value, -0.5);
    }

    #[test]
    fn mapper_rejects_bad_axes() {
        assert_eq!(CommandMapper::new(&[]).unwrap_err(), EncodeError::NoAxes);
        let dup = AxisMap { channel: 0, source: SourceAxis::X, range: [0.0, 1.0], invert: false };
        assert_eq!(CommandMapper::new(&[dup.clone(), dup]).unwrap_err(), EncodeError::DuplicateChannel(0));
        let flat = AxisMap { channel: 0, source: SourceAxis::X, range: [5.0, 5.0], invert: false };
        assert_eq!(CommandMapper::new(&[flat]).unwrap_err(), EncodeError::Range { min: 5.0, max: 5.0 });
    }

    #[test]
    fn servo_degrees_cover_half_circle() {
        assert_eq!(to_servo_degrees(-1.0), 0.0);
        assert_eq!(to_servo_degrees(0.0), 90.0);
        assert_eq!(to_servo_degrees(3.0), 180.0);
    }

    #[test]
    fn duty_for_standard_servo_at_50hz() {
        assert_relative_eq!(degrees_to_duty(0.0, 1000, 2000, 50.0), 5.0);
        assert_relative_eq!(degrees_to_duty(90.0, 1000, 2000, 50.0), 7.5);
        assert_relative_eq!(degrees_to_duty(180.0, 1000, 2000, 50.0), 10.0);
        assert_relative_eq!(degrees_to_duty(400.0, 1000, 2000, 50.0), 10.0);
    }

    #[test]
    fn pulse_width_endpoints() {
        assert_eq!(to_pulse_us(-1.0, 1000, 2000), 1000);
        assert_eq!(to_pulse_us(0.0, 1000, 2000), 1500);
        assert_eq!(to_pulse_us(1.0, 1000, 2000), 2000);
    }

    #[test]
    fn sbus_reference_points() {
        assert_eq!(radians_to_sbus(0.0, 1000, 2000), 1500);
        assert_eq!(radians_to_sbus(PI, 1000, 2000), 2000);
        assert_eq!(radians_to_sbus(-PI, 1000, 2000), 1000);
        assert_eq!(radians_to_sbus(1.0f64.sin(), 1000, 2000), 1633);
    }

    #[test]
    fn sbus_clamps_instead_of_wrapping() {
        assert_eq!(radians_to_sbus(2.0 * PI, 1000, 2000), radians_to_sbus(PI, 1000, 2000));
        assert_eq!(radians_to_sbus(-7.0, 1000, 2000), 1000);
        assert_eq!(radians_to_sbus(f64::NAN, 1000, 2000), 1500);
    }

    #[test]
    fn sbus_decode_recovers_angle_within_one_step() {
        let quantum = 2.0 * PI / 1000.0;
        for a in [-PI, -2.5, -1.0, -0.001, 0.0, 0.3, 1.7, 3.0, PI] {
            let back = sbus_to_radians(radians_to_sbus(a, 1000, 2000), 1000, 2000);
            assert!((back - a).abs() <= quantum, "{} -> {}", a, back);
        }
    }

    #[test]
    fn axis_range_round_trip() {
        let r = AxisRange::new(-20.0, 60.0).unwrap();
        assert_relative_eq!(r.denormalize(r.normalize(12.5)), 12.5, epsilon = 1e-12);
        assert_eq!(r.normalize(f64::INFINITY), 0.0);
    }
}

pub mod pigpio;
pub mod pwm;
pub mod retry;
pub mod serial;
pub mod sink;
pub mod state;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use seeker_proto::{FrameFormat, WireFrame};
use serde::Deserialize;
use thiserror::Error;

pub use pigpio::PigpioDaemon;
pub use pwm::{PwmChannel, SysfsPwm};
pub use retry::{emit_with_retry, RetryPolicy};
pub use serial::SbusSerial;
pub use sink::LogTransport;
pub use state::LinkStatus;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("open {target}: {source}")]
    Open { target: String, source: std::io::Error },
    #[error("open serial {target}: {source}")]
    Serial { target: String, source: tokio_serial::Error },
    #[error("write {target}: {source}")]
    Write { target: String, source: std::io::Error },
    #[error("{transport} cannot carry {frame} frames")]
    Unsupported { transport: &'static str, frame: &'static str },
    #[error("daemon rejected command {cmd}: error {code}")]
    Daemon { cmd: u32, code: i32 },
    #[error("transport already released")]
    Released,
    #[error("no output bound to channel {0}")]
    UnknownChannel(u8),
}

impl TransportError {
    /// Only I/O write faults may clear on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Write { .. })
    }
}

/// Actuator output. Opening is construction; `release` stops the output and
/// closes the handle.
#[async_trait]
pub trait Transport: Send {
    fn name(&self) -> &str;

    async fn emit(&mut self, frame: &WireFrame) -> Result<(), TransportError>;

    async fn release(&mut self) -> Result<(), TransportError>;

    fn status(&self) -> &LinkStatus;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn emit(&mut self, frame: &WireFrame) -> Result<(), TransportError> {
        (**self).emit(frame).await
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        (**self).release().await
    }

    fn status(&self) -> &LinkStatus {
        (**self).status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Sbus,
    Pwm,
    Pigpio,
    /// No hardware: frames go to the log.
    Log,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub kind: OutputKind,

    /// Frame format used when `kind = "log"`.
    #[serde(default)]
    pub log_as: LogFormat,

    #[serde(default)]
    pub sbus: SbusConfig,
    #[serde(default)]
    pub pwm: PwmConfig,
    #[serde(default)]
    pub pigpio: PigpioConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Sbus,
    Pwm,
    Pulse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbusConfig {
    #[serde(default = "default_serial_dev")]
    pub serial_dev: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Channel value range; 0 rad lands on the midpoint.
    #[serde(default = "default_sbus_min")]
    pub min: u16,
    #[serde(default = "default_sbus_max")]
    pub max: u16,
}

fn default_serial_dev() -> String { "/dev/ttyUSB0".into() }
fn default_baud() -> u32 { 115200 }
fn default_sbus_min() -> u16 { 1000 }
fn default_sbus_max() -> u16 { 2000 }

impl Default for SbusConfig {
    fn default() -> Self {
        Self {
            serial_dev: default_serial_dev(),
            baud: default_baud(),
            min: default_sbus_min(),
            max: default_sbus_max(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PwmMode {
    /// Drive for `hold_ms`, then stop, on every command.
    #[default]
    Pulse,
    Continuous,
}

/// Command channel -> PWM output index on the chip.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PwmBinding {
    pub channel: u8,
    pub index: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PwmConfig {
    #[serde(default = "default_pwm_chip")]
    pub chip: String,
    /// GPIO18 is pwm0 on the Pi's first chip.
    #[serde(default = "default_pwm_bindings")]
    pub channels: Vec<PwmBinding>,
    #[serde(default = "default_freq_hz")]
    pub freq_hz: f64,
    #[serde(default = "default_pulse_min_us")]
    pub pulse_min_us: u32,
    #[serde(default = "default_pulse_max_us")]
    pub pulse_max_us: u32,
    #[serde(default)]
    pub mode: PwmMode,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
}

fn default_pwm_chip() -> String { "/sys/class/pwm/pwmchip0".into() }
fn default_pwm_bindings() -> Vec<PwmBinding> { vec![PwmBinding { channel: 0, index: 0 }] }
fn default_freq_hz() -> f64 { 50.0 }
fn default_pulse_min_us() -> u32 { 1000 }
fn default_pulse_max_us() -> u32 { 2000 }
fn default_hold_ms() -> u64 { 1000 }

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            chip: default_pwm_chip(),
            channels: default_pwm_bindings(),
            freq_hz: default_freq_hz(),
            pulse_min_us: default_pulse_min_us(),
            pulse_max_us: default_pulse_max_us(),
            mode: PwmMode::default(),
            hold_ms: default_hold_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PigpioConfig {
    #[serde(default = "default_pigpio_host")]
    pub host: String,
    #[serde(default = "default_pigpio_port")]
    pub port: u16,
    #[serde(default = "default_pulse_min_us")]
    pub pulse_min_us: u32,
    #[serde(default = "default_pulse_max_us")]
    pub pulse_max_us: u32,
}

fn default_pigpio_host() -> String { "127.0.0.1".into() }
fn default_pigpio_port() -> u16 { 8888 }

impl Default for PigpioConfig {
    fn default() -> Self {
        Self {
            host: default_pigpio_host(),
            port: default_pigpio_port(),
            pulse_min_us: default_pulse_min_us(),
            pulse_max_us: default_pulse_max_us(),
        }
    }
}

impl OutputConfig {
    pub fn frame_format(&self) -> FrameFormat {
        let sbus = || FrameFormat::Sbus { min: self.sbus.min, max: self.sbus.max };
        let pwm = || FrameFormat::Pwm {
            freq_hz: self.pwm.freq_hz,
            pulse_min_us: self.pwm.pulse_min_us,
            pulse_max_us: self.pwm.pulse_max_us,
            hold: match self.pwm.mode {
                PwmMode::Pulse => Some(Duration::from_millis(self.pwm.hold_ms)),
                PwmMode::Continuous => None,
            },
        };
        let pulse = || FrameFormat::Pulse { min_us: self.pigpio.pulse_min_us, max_us: self.pigpio.pulse_max_us };
        match self.kind {
            OutputKind::Sbus => sbus(),
            OutputKind::Pwm => pwm(),
            OutputKind::Pigpio => pulse(),
            OutputKind::Log => match self.log_as {
                LogFormat::Sbus => sbus(),
                LogFormat::Pwm => pwm(),
                LogFormat::Pulse => pulse(),
            },
        }
    }

    /// Acquire the configured output. `channels` are the command channels the
    /// mapper produces; for the pin daemon they are GPIO numbers.
    pub async fn open(&self, channels: &[u8]) -> Result<Box<dyn Transport>, TransportError> {
        let t: Box<dyn Transport> = match self.kind {
            OutputKind::Sbus => Box::new(SbusSerial::open(&self.sbus.serial_dev, self.sbus.baud)?),
            OutputKind::Pwm => Box::new(SysfsPwm::open(&self.pwm).await?),
            OutputKind::Pigpio => {
                Box::new(PigpioDaemon::connect(&self.pigpio.host, self.pigpio.port, channels).await?)
            }
            OutputKind::Log => Box::new(LogTransport::new()),
        };
        Ok(t)
    }
}

pub fn check_output(cfg: &OutputConfig) -> Result<()> {
    let s = &cfg.sbus;
    anyhow::ensure!(s.baud > 0, "output.sbus.baud must be > 0");
    anyhow::ensure!(s.min < s.max && s.max <= 0x07FF, "output.sbus range must satisfy min < max <= 2047");

    let p = &cfg.pwm;
    anyhow::ensure!(p.freq_hz > 0.0 && p.freq_hz.is_finite(), "output.pwm.freq_hz must be > 0");
    anyhow::ensure!(p.pulse_min_us < p.pulse_max_us, "output.pwm pulse range must satisfy min < max");
    anyhow::ensure!(
        (p.pulse_max_us as f64) <= 1_000_000.0 / p.freq_hz,
        "output.pwm.pulse_max_us exceeds the PWM period"
    );
    anyhow::ensure!(!p.channels.is_empty(), "output.pwm.channels must not be empty");
    for (i, b) in p.channels.iter().enumerate() {
        anyhow::ensure!(
            !p.channels[..i].iter().any(|o| o.channel == b.channel || o.index == b.index),
            "output.pwm.channels: duplicate binding for channel {}",
            b.channel
        );
    }
    if p.mode == PwmMode::Pulse {
        anyhow::ensure!(p.hold_ms > 0, "output.pwm.hold_ms must be > 0 in pulse mode");
    }

    let g = &cfg.pigpio;
    anyhow::ensure!(
        500 <= g.pulse_min_us && g.pulse_min_us < g.pulse_max_us && g.pulse_max_us <= 2500,
        "output.pigpio pulse range must satisfy 500 <= min < max <= 2500"
    );
    Ok(())
}

/// Every command channel the mapper produces must reach a physical output.
pub fn check_channels(cfg: &OutputConfig, channels: &[u8]) -> Result<()> {
    if cfg.kind == OutputKind::Pwm {
        for ch in channels {
            anyhow::ensure!(
                cfg.pwm.channels.iter().any(|b| b.channel == *ch),
                "axis channel {} has no output.pwm.channels binding",
                ch
            );
        }
    }
    Ok(())
}

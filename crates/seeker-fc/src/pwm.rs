use std::path::{Path, PathBuf};

use async_trait::async_trait;
use seeker_proto::WireFrame;
use tracing::{debug, info, warn};

use crate::{LinkStatus, PwmConfig, Transport, TransportError};

/// One output of a Linux PWM chip (`/sys/class/pwm/pwmchipN/pwmM`).
#[derive(Debug)]
pub struct PwmChannel {
    chip: PathBuf,
    index: u32,
    period_ns: u64,
    exported: bool,
    enabled: bool,
}

impl PwmChannel {
    pub async fn open(chip: impl AsRef<Path>, index: u32, freq_hz: f64) -> Result<Self, TransportError> {
        let chip = chip.as_ref().to_path_buf();
        let mut ch = Self {
            chip,
            index,
            period_ns: (1e9 / freq_hz).round() as u64,
            exported: false,
            enabled: false,
        };
        if tokio::fs::metadata(ch.dir()).await.is_err() {
            write_attr(&ch.chip.join("export"), &index.to_string(), true).await?;
            ch.exported = true;
        }
        ch.write("period", &ch.period_ns.to_string(), true).await?;
        Ok(ch)
    }

    fn dir(&self) -> PathBuf {
        self.chip.join(format!("pwm{}", self.index))
    }

    async fn write(&self, attr: &str, value: &str, opening: bool) -> Result<(), TransportError> {
        write_attr(&self.dir().join(attr), value, opening).await
    }

    /// Drive the output at `percent` of the period.
    pub async fn start(&mut self, percent: f64) -> Result<(), TransportError> {
        let duty_ns = (self.period_ns as f64 * percent.clamp(0.0, 100.0) / 100.0).round() as u64;
        self.write("duty_cycle", &duty_ns.to_string(), false).await?;
        if !self.enabled {
            self.write("enable", "1", false).await?;
            self.enabled = true;
        }
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), TransportError> {
        if self.enabled {
            self.write("enable", "0", false).await?;
            self.enabled = false;
        }
        Ok(())
    }

    async fn close(mut self) -> Result<(), TransportError> {
        self.stop().await?;
        if self.exported {
            write_attr(&self.chip.join("unexport"), &self.index.to_string(), false).await?;
        }
        Ok(())
    }
}

async fn write_attr(path: &Path, value: &str, opening: bool) -> Result<(), TransportError> {
    tokio::fs::write(path, value).await.map_err(|source| {
        let target = path.display().to_string();
        if opening {
            TransportError::Open { target, source }
        } else {
            TransportError::Write { target, source }
        }
    })
}

/// Sysfs PWM outputs keyed by command channel.
pub struct SysfsPwm {
    outputs: Vec<(u8, PwmChannel)>,
    status: LinkStatus,
}

impl SysfsPwm {
    pub async fn open(cfg: &PwmConfig) -> Result<Self, TransportError> {
        let mut outputs = Vec::with_capacity(cfg.channels.len());
        for b in &cfg.channels {
            outputs.push((b.channel, PwmChannel::open(&cfg.chip, b.index, cfg.freq_hz).await?));
        }
        info!("pwm: open {} ({} outputs @ {} Hz)", cfg.chip, outputs.len(), cfg.freq_hz);
        Ok(Self { outputs, status: LinkStatus::default() })
    }

    fn output(&mut self, channel: u8) -> Result<&mut PwmChannel, TransportError> {
        self.outputs
            .iter_mut()
            .find(|(c, _)| *c == channel)
            .map(|(_, out)| out)
            .ok_or(TransportError::UnknownChannel(channel))
    }

    async fn stop_all(&mut self) -> Result<(), TransportError> {
        for (_, out) in &mut self.outputs {
            out.stop().await?;
        }
        Ok(())
    }

    async fn drive(&mut self, frame: &WireFrame) -> Result<(), TransportError> {
        let WireFrame::Pwm { duties, hold } = frame else {
            return Err(TransportError::Unsupported { transport: "pwm", frame: frame.kind() });
        };
        for d in duties {
            self.output(d.channel)?.start(d.percent).await?;
        }
        if let Some(hold) = hold {
            tokio::time::sleep(*hold).await;
            self.stop_all().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SysfsPwm {
    fn name(&self) -> &str {
        "pwm"
    }

    async fn emit(&mut self, frame: &WireFrame) -> Result<(), TransportError> {
        if self.status.released {
            return Err(TransportError::Released);
        }
        match self.drive(frame).await {
            Ok(()) => {
                self.status.record(frame);
                debug!("pwm: {}", frame);
                Ok(())
            }
            Err(e) => {
                self.status.write_failures += 1;
                Err(e)
            }
        }
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        if self.status.released {
            return Ok(());
        }
        self.status.released = true;
        let mut first_err = None;
        for (_, out) in self.outputs.drain(..) {
            if let Err(e) = out.close().await {
                warn!("pwm: release: {}", e);
                first_err.get_or_insert(e);
            }
        }
        info!("pwm: released after {} frames", self.status.frames_sent);
        first_err.map_or(Ok(()), Err)
    }

    fn status(&self) -> &LinkStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PwmBinding;
    use seeker_proto::DutyCycle;
    use std::time::Duration;

    fn read(p: &Path) -> String {
        std::fs::read_to_string(p).unwrap()
    }

    fn fake_chip(indices: &[u32]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in indices {
            std::fs::create_dir(dir.path().join(format!("pwm{}", i))).unwrap();
        }
        dir
    }

    fn cfg(chip: &Path) -> PwmConfig {
        PwmConfig {
            chip: chip.display().to_string(),
            channels: vec![PwmBinding { channel: 0, index: 0 }],
            ..PwmConfig::default()
        }
    }

    #[tokio::test]
    async fn open_sets_period_from_frequency() {
        let chip = fake_chip(&[0]);
        let ch = PwmChannel::open(chip.path(), 0, 50.0).await.unwrap();
        assert_eq!(read(&chip.path().join("pwm0/period")), "20000000");
        assert!(!ch.exported);
    }

    #[tokio::test]
    async fn start_writes_duty_and_enables() {
        let chip = fake_chip(&[0]);
        let mut ch = PwmChannel::open(chip.path(), 0, 50.0).await.unwrap();
        ch.start(7.5).await.unwrap();
        assert_eq!(read(&chip.path().join("pwm0/duty_cycle")), "1500000");
        assert_eq!(read(&chip.path().join("pwm0/enable")), "1");
        ch.stop().await.unwrap();
        assert_eq!(read(&chip.path().join("pwm0/enable")), "0");
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_frame_holds_then_idles() {
        let chip = fake_chip(&[0]);
        let mut pwm = SysfsPwm::open(&cfg(chip.path())).await.unwrap();
        let frame = WireFrame::Pwm {
            duties: vec![DutyCycle { channel: 0, percent: 10.0 }],
            hold: Some(Duration::from_secs(1)),
        };
        let t0 = tokio::time::Instant::now();
        pwm.emit(&frame).await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(1));
        assert_eq!(read(&chip.path().join("pwm0/duty_cycle")), "2000000");
        assert_eq!(read(&chip.path().join("pwm0/enable")), "0");
        assert_eq!(pwm.status().frames_sent, 1);
    }

    #[tokio::test]
    async fn continuous_frame_stays_enabled_until_release() {
        let chip = fake_chip(&[0]);
        let mut pwm = SysfsPwm::open(&cfg(chip.path())).await.unwrap();
        let frame = WireFrame::Pwm { duties: vec![DutyCycle { channel: 0, percent: 5.0 }], hold: None };
        pwm.emit(&frame).await.unwrap();
        assert_eq!(read(&chip.path().join("pwm0/enable")), "1");
        pwm.release().await.unwrap();
        assert_eq!(read(&chip.path().join("pwm0/enable")), "0");
        assert!(matches!(pwm.emit(&frame).await, Err(TransportError::Released)));
    }

    #[tokio::test]
    async fn unbound_channel_is_rejected() {
        let chip = fake_chip(&[0]);
        let mut pwm = SysfsPwm::open(&cfg(chip.path())).await.unwrap();
        let frame = WireFrame::Pwm { duties: vec![DutyCycle { channel: 4, percent: 5.0 }], hold: None };
        assert!(matches!(pwm.emit(&frame).await, Err(TransportError::UnknownChannel(4))));
        assert_eq!(pwm.status().write_failures, 1);
    }

    #[tokio::test]
    async fn missing_chip_fails_to_open() {
        let chip = tempfile::tempdir().unwrap();
        let cfg = cfg(&chip.path().join("pwmchip9"));
        assert!(matches!(SysfsPwm::open(&cfg).await, Err(TransportError::Open { .. })));
    }
}

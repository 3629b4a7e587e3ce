use std::time::Duration;

use async_trait::async_trait;
use seeker_proto::WireFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{LinkStatus, Transport, TransportError};

/// pigpiod socket command codes.
pub const CMD_MODES: u32 = 0;
pub const CMD_SERVO: u32 = 8;
pub const MODE_OUTPUT: u32 = 1;

/// Servo pulse test: alternate the two extremes.
pub const SWEEP_PULSES_US: [u32; 2] = [1000, 2000];

/// Servo pulses through a running pigpiod. Requests and replies are 16 bytes,
/// four little-endian u32 words; the reply's last word is the signed result.
pub struct PigpioDaemon {
    addr: String,
    stream: Option<TcpStream>,
    gpios: Vec<u8>,
    status: LinkStatus,
}

impl PigpioDaemon {
    pub async fn connect(host: &str, port: u16, gpios: &[u8]) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransportError::Open { target: addr.clone(), source })?;
        let mut d = Self { addr, stream: Some(stream), gpios: gpios.to_vec(), status: LinkStatus::default() };
        for g in gpios {
            d.command(CMD_MODES, *g as u32, MODE_OUTPUT).await?;
        }
        info!("pigpio: connected {} (gpio {:?})", d.addr, d.gpios);
        Ok(d)
    }

    async fn command(&mut self, cmd: u32, p1: u32, p2: u32) -> Result<i32, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Released)?;
        let mut req = [0u8; 16];
        req[0..4].copy_from_slice(&cmd.to_le_bytes());
        req[4..8].copy_from_slice(&p1.to_le_bytes());
        req[8..12].copy_from_slice(&p2.to_le_bytes());

        let mut resp = [0u8; 16];
        let io = async {
            stream.write_all(&req).await?;
            stream.read_exact(&mut resp).await?;
            Ok::<_, std::io::Error>(())
        };
        io.await.map_err(|source| TransportError::Write { target: self.addr.clone(), source })?;

        let res = i32::from_le_bytes([resp[12], resp[13], resp[14], resp[15]]);
        if res < 0 {
            return Err(TransportError::Daemon { cmd, code: res });
        }
        Ok(res)
    }

    /// 0 switches the servo pulses off.
    pub async fn set_servo_pulsewidth(&mut self, gpio: u8, pulse_us: u32) -> Result<(), TransportError> {
        if !self.gpios.contains(&gpio) {
            return Err(TransportError::UnknownChannel(gpio));
        }
        self.command(CMD_SERVO, gpio as u32, pulse_us).await?;
        Ok(())
    }

    /// Bench test for a servo on `gpio`: `cycles` rounds of min/max pulses.
    pub async fn sweep(&mut self, gpio: u8, cycles: u32, dwell: Duration) -> Result<(), TransportError> {
        for cycle in 0..cycles {
            for pulse in SWEEP_PULSES_US {
                debug!("pigpio: sweep {}/{} gpio{}={}us", cycle + 1, cycles, gpio, pulse);
                self.set_servo_pulsewidth(gpio, pulse).await?;
                tokio::time::sleep(dwell).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for PigpioDaemon {
    fn name(&self) -> &str {
        "pigpio"
    }

    async fn emit(&mut self, frame: &WireFrame) -> Result<(), TransportError> {
        let WireFrame::Pulse(pulses) = frame else {
            return Err(TransportError::Unsupported { transport: "pigpio", frame: frame.kind() });
        };
        for p in pulses {
            if let Err(e) = self.set_servo_pulsewidth(p.channel, p.micros).await {
                self.status.write_failures += 1;
                return Err(e);
            }
        }
        self.status.record(frame);
        debug!("pigpio: {}", frame);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let mut first_err = None;
        for g in self.gpios.clone() {
            if let Err(e) = self.command(CMD_SERVO, g as u32, 0).await {
                warn!("pigpio: release gpio{}: {}", g, e);
                first_err.get_or_insert(e);
            }
        }
        self.stream = None;
        self.status.released = true;
        info!("pigpio: released {} after {} frames", self.addr, self.status.frames_sent);
        first_err.map_or(Ok(()), Err)
    }

    fn status(&self) -> &LinkStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeker_proto::PulseWidth;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Log = Arc<Mutex<Vec<[u32; 3]>>>;

    /// Minimal pigpiod: records requests, answers 0, or -1 for pulses above 2500.
    async fn fake_daemon() -> (u16, Log) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log: Log = Arc::default();
        let seen = log.clone();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 16];
            while sock.read_exact(&mut req).await.is_ok() {
                let word = |i: usize| u32::from_le_bytes([req[i], req[i + 1], req[i + 2], req[i + 3]]);
                let (cmd, p1, p2) = (word(0), word(4), word(8));
                seen.lock().unwrap().push([cmd, p1, p2]);
                let res: i32 = if cmd == CMD_SERVO && p2 > 2500 { -8 } else { 0 };
                let mut resp = req;
                resp[12..16].copy_from_slice(&res.to_le_bytes());
                if sock.write_all(&resp).await.is_err() {
                    break;
                }
            }
        });
        (port, log)
    }

    #[tokio::test]
    async fn connect_sets_output_mode() {
        let (port, log) = fake_daemon().await;
        let _d = PigpioDaemon::connect("127.0.0.1", port, &[18]).await.unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &[[CMD_MODES, 18, MODE_OUTPUT]]);
    }

    #[tokio::test]
    async fn emit_then_release_stops_pulses() {
        let (port, log) = fake_daemon().await;
        let mut d = PigpioDaemon::connect("127.0.0.1", port, &[18]).await.unwrap();
        d.emit(&WireFrame::Pulse(vec![PulseWidth { channel: 18, micros: 1500 }])).await.unwrap();
        d.release().await.unwrap();
        d.release().await.unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log[1..], [[CMD_SERVO, 18, 1500], [CMD_SERVO, 18, 0]]);
        assert!(d.status().released);
    }

    #[tokio::test]
    async fn daemon_errors_surface() {
        let (port, _log) = fake_daemon().await;
        let mut d = PigpioDaemon::connect("127.0.0.1", port, &[18]).await.unwrap();
        let err = d.set_servo_pulsewidth(18, 3000).await.unwrap_err();
        assert!(matches!(err, TransportError::Daemon { cmd: CMD_SERVO, code: -8 }));
        assert!(matches!(d.set_servo_pulsewidth(4, 1500).await, Err(TransportError::UnknownChannel(4))));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_alternates_extremes() {
        let (port, log) = fake_daemon().await;
        let mut d = PigpioDaemon::connect("127.0.0.1", port, &[18]).await.unwrap();
        d.sweep(18, 2, Duration::from_secs(1)).await.unwrap();
        let pulses: Vec<u32> = log.lock().unwrap()[1..].iter().map(|r| r[2]).collect();
        assert_eq!(pulses, vec![1000, 2000, 1000, 2000]);
    }

    #[tokio::test]
    async fn refused_connection_is_an_open_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = PigpioDaemon::connect("127.0.0.1", port, &[18]).await.err().unwrap();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}

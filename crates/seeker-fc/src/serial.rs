use async_trait::async_trait;
use seeker_proto::WireFrame;
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::{LinkStatus, Transport, TransportError};

/// SBUS frames over a UART. Write-only, no handshake.
pub struct SbusSerial {
    dev: String,
    port: Option<SerialStream>,
    status: LinkStatus,
}

impl SbusSerial {
    pub fn open(dev: &str, baud: u32) -> Result<Self, TransportError> {
        let port = tokio_serial::new(dev, baud)
            .open_native_async()
            .map_err(|source| TransportError::Serial { target: dev.to_string(), source })?;
        info!("sbus: open {} @ {}", dev, baud);
        Ok(Self { dev: dev.to_string(), port: Some(port), status: LinkStatus::default() })
    }
}

#[async_trait]
impl Transport for SbusSerial {
    fn name(&self) -> &str {
        "sbus"
    }

    async fn emit(&mut self, frame: &WireFrame) -> Result<(), TransportError> {
        let WireFrame::Sbus(sbus) = frame else {
            return Err(TransportError::Unsupported { transport: "sbus", frame: frame.kind() });
        };
        let port = self.port.as_mut().ok_or(TransportError::Released)?;
        let write = async {
            port.write_all(sbus.as_bytes()).await?;
            port.flush().await
        };
        if let Err(source) = write.await {
            self.status.write_failures += 1;
            return Err(TransportError::Write { target: self.dev.clone(), source });
        }
        self.status.record(frame);
        debug!("sbus: {}", frame);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        let Some(mut port) = self.port.take() else { return Ok(()) };
        self.status.released = true;
        info!("sbus: close {} after {} frames", self.dev, self.status.frames_sent);
        port.flush().await.map_err(|source| TransportError::Write { target: self.dev.clone(), source })
    }

    fn status(&self) -> &LinkStatus {
        &self.status
    }
}

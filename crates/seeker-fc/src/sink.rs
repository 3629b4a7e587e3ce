use async_trait::async_trait;
use seeker_proto::WireFrame;
use tracing::info;

use crate::{LinkStatus, Transport, TransportError};

/// Frames go to the log; nothing is driven.
#[derive(Debug, Default)]
pub struct LogTransport {
    status: LinkStatus,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&mut self, frame: &WireFrame) -> Result<(), TransportError> {
        if self.status.released {
            return Err(TransportError::Released);
        }
        self.status.record(frame);
        info!("out: #{} {}", self.status.frames_sent, frame);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        if !self.status.released {
            self.status.released = true;
            info!("out: released after {} frames", self.status.frames_sent);
        }
        Ok(())
    }

    fn status(&self) -> &LinkStatus {
        &self.status
    }
}

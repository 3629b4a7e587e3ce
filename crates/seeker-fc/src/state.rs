use std::time::{Duration, Instant};

use seeker_proto::WireFrame;

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub frames_sent: u64,
    pub write_failures: u64,
    pub last_frame: Option<String>,
    pub last_write: Option<Instant>,
    pub released: bool,
}

impl LinkStatus {
    pub fn record(&mut self, frame: &WireFrame) {
        self.frames_sent += 1;
        self.last_frame = Some(frame.to_string());
        self.last_write = Some(Instant::now());
    }

    pub fn write_age(&self) -> Option<Duration> {
        self.last_write.map(|t| t.elapsed())
    }
}

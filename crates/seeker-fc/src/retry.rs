use std::time::Duration;

use seeker_proto::WireFrame;
use tracing::warn;

use crate::{Transport, TransportError};

/// Extra write attempts after a failed emit. The default makes a single
/// failed write final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub extra_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(extra_attempts: u32, backoff: Duration) -> Self {
        Self { extra_attempts, backoff }
    }
}

pub async fn emit_with_retry<T: Transport + ?Sized>(
    transport: &mut T,
    frame: &WireFrame,
    policy: RetryPolicy,
) -> Result<(), TransportError> {
    let mut attempt = 0;
    loop {
        match transport.emit(frame).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < policy.extra_attempts => {
                attempt += 1;
                warn!("{}: write failed ({}), retry {}/{}", transport.name(), e, attempt, policy.extra_attempts);
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LinkStatus;
    use async_trait::async_trait;
    use seeker_proto::SbusFrame;

    struct Flaky {
        failures_left: u32,
        attempts: u32,
        status: LinkStatus,
    }

    #[async_trait]
    impl Transport for Flaky {
        fn name(&self) -> &str { "flaky" }

        async fn emit(&mut self, frame: &WireFrame) -> Result<(), TransportError> {
            self.attempts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(TransportError::Write {
                    target: "flaky".into(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
                });
            }
            self.status.record(frame);
            Ok(())
        }

        async fn release(&mut self) -> Result<(), TransportError> { Ok(()) }

        fn status(&self) -> &LinkStatus { &self.status }
    }

    fn frame() -> WireFrame {
        WireFrame::Sbus(SbusFrame::new(1500, 1500))
    }

    #[tokio::test]
    async fn single_failure_is_final_by_default() {
        let mut t = Flaky { failures_left: 1, attempts: 0, status: LinkStatus::default() };
        assert!(emit_with_retry(&mut t, &frame(), RetryPolicy::default()).await.is_err());
        assert_eq!(t.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retries_recover() {
        let mut t = Flaky { failures_left: 2, attempts: 0, status: LinkStatus::default() };
        let policy = RetryPolicy::new(2, Duration::from_millis(5));
        emit_with_retry(&mut t, &frame(), policy).await.unwrap();
        assert_eq!(t.attempts, 3);
        assert_eq!(t.status.frames_sent, 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mut t = Flaky { failures_left: 10, attempts: 0, status: LinkStatus::default() };
        assert!(emit_with_retry(&mut t, &frame(), RetryPolicy::new(3, Duration::ZERO)).await.is_err());
        assert_eq!(t.attempts, 4);
    }
}

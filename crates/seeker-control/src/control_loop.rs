use std::time::Duration;

use seeker_fc::{emit_with_retry, RetryPolicy, Transport};
use seeker_guide::{GuidanceLaw, GuidanceState, Position};
use seeker_proto::telemetry::{EventKind, TickEvent};
use seeker_proto::{ActuatorCommand, CommandMapper, FrameEncoder, WireFrame};
use seeker_vision::{Detector, TargetObservation};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{LoopConfig, LostPolicy};
use crate::{CancelToken, ControlError, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Arrived,
    Cancelled,
    /// `max_ticks` ran out first.
    TickLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub outcome: Outcome,
    pub ticks: u64,
    pub steps: u64,
    pub held_ticks: u64,
    pub degenerate_ticks: u64,
    pub final_position: Position,
}

/// What the detector gave us this tick.
enum Sensed {
    Fresh(TargetObservation),
    /// Timed out; the last target stands.
    Stale,
    Lost { reason: String, confidence: Option<f32> },
}

enum Flow {
    Continue,
    Cancelled,
}

/// Fixed-period sense, guide, map, encode, emit.
///
/// The transport is acquired by the caller and released by [`ControlLoop::run`]
/// exactly once, whichever way the loop ends.
pub struct ControlLoop<D, T> {
    cfg: LoopConfig,
    conf_threshold: f32,
    detector_timeout: Duration,
    retry: RetryPolicy,

    law: GuidanceLaw,
    state: GuidanceState,
    has_target: bool,
    mapper: CommandMapper,
    encoder: FrameEncoder,

    detector: D,
    transport: T,
    cancel: CancelToken,
    telemetry: Option<mpsc::Sender<TickEvent>>,

    tick: u64,
    steps: u64,
    held_ticks: u64,
    degenerate_ticks: u64,
    lost_streak: u64,
    confidence: Option<f32>,
    last_commands: Vec<ActuatorCommand>,
    last_frame: Option<WireFrame>,
    released: bool,
}

impl<D: Detector, T: Transport> ControlLoop<D, T> {
    pub fn new(pipeline: Pipeline, detector: D, transport: T, cancel: CancelToken) -> Self {
        let Pipeline { law, start, mapper, encoder, vision, control } = pipeline;
        let retry = RetryPolicy::new(control.write_retries, Duration::from_millis(control.retry_backoff_ms));
        Self {
            conf_threshold: vision.conf_threshold,
            detector_timeout: Duration::from_millis(vision.timeout_ms),
            retry,
            cfg: control,
            law,
            // no target until the first confident observation
            state: GuidanceState::new(start, start),
            has_target: false,
            mapper,
            encoder,
            detector,
            transport,
            cancel,
            telemetry: None,
            tick: 0,
            steps: 0,
            held_ticks: 0,
            degenerate_ticks: 0,
            lost_streak: 0,
            confidence: None,
            last_commands: Vec::new(),
            last_frame: None,
            released: false,
        }
    }

    /// Publish a [`TickEvent`] per tick. Events are dropped when the receiver lags.
    pub fn with_telemetry(mut self, tx: mpsc::Sender<TickEvent>) -> Self {
        self.telemetry = Some(tx);
        self
    }

    pub fn state(&self) -> &GuidanceState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Runs until arrival, cancellation, the tick limit or a fatal error, then
    /// releases the transport.
    pub async fn run(&mut self) -> Result<LoopReport, ControlError> {
        info!(
            "loop: start at {:?}, period {}ms, output {}",
            self.state.current.as_slice(),
            self.cfg.period_ms,
            self.transport.name()
        );
        let res = self.drive().await;
        let released = self.release().await;

        match (res, released) {
            (Ok(report), Ok(())) => {
                info!(
                    "loop: {:?} after {} ticks ({} steps, {} held) at {:?}",
                    report.outcome,
                    report.ticks,
                    report.steps,
                    report.held_ticks,
                    report.final_position.as_slice()
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(re)) => {
                warn!("loop: release after failure also failed: {}", re);
                Err(e)
            }
        }
    }

    async fn release(&mut self) -> Result<(), ControlError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.transport.release().await.map_err(|e| {
            warn!("loop: release {}: {}", self.transport.name(), e);
            ControlError::ActuatorUnavailable(e)
        })
    }

    async fn drive(&mut self) -> Result<LoopReport, ControlError> {
        let cancel = self.cancel.clone();
        let period = Duration::from_millis(self.cfg.period_ms);
        let mut deadline = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Ok(self.finish(Outcome::Cancelled));
            }
            if self.cfg.max_ticks.is_some_and(|m| self.tick >= m) {
                return Ok(self.finish(Outcome::TickLimit));
            }
            self.tick += 1;
            deadline += period;

            let sensed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.finish(Outcome::Cancelled)),
                r = timeout(self.detector_timeout, self.detector.observe()) => self.classify(r),
            };

            let flow = match sensed {
                Sensed::Fresh(obs) => {
                    let p = obs.position;
                    self.state.target = Position::new(p.x, p.y, self.cfg.target_z);
                    self.confidence = Some(obs.confidence);
                    self.has_target = true;
                    self.end_lost_streak();
                    self.track().await?
                }
                Sensed::Stale if self.has_target => {
                    debug!("loop: detector timeout, reusing last target");
                    self.track().await?
                }
                Sensed::Stale => self.hold("detector timeout before first target".into(), None).await?,
                Sensed::Lost { reason, confidence } => self.hold(reason, confidence).await?,
            };
            let Some(flow) = flow else {
                return Ok(self.finish(Outcome::Arrived));
            };
            if let Flow::Cancelled = flow {
                return Ok(self.finish(Outcome::Cancelled));
            }

            let now = Instant::now();
            if now > deadline {
                warn!("loop: tick {} overran by {:?}", self.tick, now - deadline);
                // skip the lost time instead of bursting to catch up
                deadline = now;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.finish(Outcome::Cancelled)),
                _ = sleep_until(deadline) => {}
            }
        }
    }

    fn classify(
        &self,
        r: Result<anyhow::Result<Option<TargetObservation>>, tokio::time::error::Elapsed>,
    ) -> Sensed {
        match r {
            Err(_) => Sensed::Stale,
            Ok(Ok(Some(obs))) if obs.is_confident(self.conf_threshold) => Sensed::Fresh(obs),
            Ok(Ok(Some(obs))) => Sensed::Lost {
                reason: format!("confidence {:.2} <= {:.2}", obs.confidence, self.conf_threshold),
                confidence: Some(obs.confidence),
            },
            Ok(Ok(None)) => Sensed::Lost { reason: "no detection".into(), confidence: None },
            Ok(Err(e)) => Sensed::Lost { reason: format!("detector: {:#}", e), confidence: None },
        }
    }

    /// Guidance tick. `None` means arrived and the loop should stop.
    async fn track(&mut self) -> Result<Option<Flow>, ControlError> {
        if self.law.arrived(&self.state) {
            if self.cfg.terminate_on_arrival {
                return Ok(None);
            }
            let commands = self.mapper.map(&self.state.current);
            let frame = self.encoder.encode(&commands)?;
            return self.emit(EventKind::Arrived, commands, frame, "arrived").await.map(Some);
        }

        let step = self.law.step(&mut self.state);
        if step.degenerate {
            self.degenerate_ticks += 1;
            let e = ControlError::DegenerateGuidance(format!("at {:?}", self.state.current.as_slice()));
            debug!("loop: tick {}: {}", self.tick, e);
        } else {
            self.steps += 1;
        }
        debug!(
            "loop: tick {} bearing {:.4} -> {:?}",
            self.tick,
            step.bearing,
            self.state.current.as_slice()
        );

        let commands = self.mapper.map(&self.state.current);
        let frame = self.encoder.encode(&commands)?;
        self.emit(EventKind::Tracking, commands, frame, "").await.map(Some)
    }

    /// Lost target: nothing advances, the output holds or centres.
    async fn hold(&mut self, reason: String, confidence: Option<f32>) -> Result<Option<Flow>, ControlError> {
        self.held_ticks += 1;
        self.lost_streak += 1;
        self.confidence = confidence;
        let e = ControlError::SensorUnavailable(reason);
        if self.lost_streak == 1 {
            warn!("loop: tick {}: {}, {:?}", self.tick, e, self.cfg.on_lost);
        } else {
            debug!("loop: tick {}: {}", self.tick, e);
        }

        let (commands, frame) = match (self.cfg.on_lost, &self.last_frame) {
            (LostPolicy::Hold, Some(frame)) => (self.last_commands.clone(), frame.clone()),
            (LostPolicy::Neutral, _) => {
                let commands = self.mapper.neutral();
                let frame = self.encoder.encode(&commands)?;
                (commands, frame)
            }
            // nothing emitted yet: command the start position
            (LostPolicy::Hold, None) => {
                let commands = self.mapper.map(&self.state.current);
                let frame = self.encoder.encode(&commands)?;
                (commands, frame)
            }
        };
        self.emit(EventKind::Holding, commands, frame, &e.to_string()).await.map(Some)
    }

    fn end_lost_streak(&mut self) {
        if self.lost_streak > 0 {
            info!("loop: target reacquired after {} ticks", self.lost_streak);
            self.lost_streak = 0;
        }
    }

    async fn emit(
        &mut self,
        kind: EventKind,
        commands: Vec<ActuatorCommand>,
        frame: WireFrame,
        msg: &str,
    ) -> Result<Flow, ControlError> {
        let cancel = self.cancel.clone();
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Flow::Cancelled),
            r = emit_with_retry(&mut self.transport, &frame, self.retry) => r,
        };
        if let Err(e) = written {
            warn!("loop: tick {}: {} write failed: {}", self.tick, self.transport.name(), e);
            return Err(ControlError::ActuatorUnavailable(e));
        }

        self.publish(kind, &commands, Some(&frame), msg);
        self.last_commands = commands;
        self.last_frame = Some(frame);
        Ok(Flow::Continue)
    }

    fn publish(&self, kind: EventKind, commands: &[ActuatorCommand], frame: Option<&WireFrame>, msg: &str) {
        let Some(tx) = &self.telemetry else { return };
        let c = self.state.current;
        let t = self.state.target;
        let ev = TickEvent {
            ts_unix_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            tick: self.tick,
            kind,
            position: [c.x, c.y, c.z],
            target: self.has_target.then_some([t.x, t.y, t.z]),
            confidence: self.confidence,
            commands: commands.to_vec(),
            frame: frame.map(|f| f.to_string()).unwrap_or_default(),
            msg: msg.to_string(),
        };
        if tx.try_send(ev).is_err() {
            debug!("loop: telemetry receiver lagging, event dropped");
        }
    }

    fn finish(&self, outcome: Outcome) -> LoopReport {
        let kind = match outcome {
            Outcome::Arrived => EventKind::Arrived,
            Outcome::Cancelled | Outcome::TickLimit => EventKind::Cancelled,
        };
        self.publish(kind, &self.last_commands, self.last_frame.as_ref(), &format!("{:?}", outcome).to_lowercase());
        LoopReport {
            outcome,
            ticks: self.tick,
            steps: self.steps,
            held_ticks: self.held_ticks,
            degenerate_ticks: self.degenerate_ticks,
            final_position: self.state.current,
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::command::ActuatorCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Guidance stepped towards a fresh or reused target.
    Tracking,
    /// No usable observation; the previous or neutral command was emitted.
    Holding,
    Arrived,
    Cancelled,
}

/// One control-loop tick, as published on the telemetry channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickEvent {
    pub ts_unix_ms: i64,
    pub tick: u64,
    pub kind: EventKind,
    pub position: [f64; 3],
    pub target: Option<[f64; 3]>,
    pub confidence: Option<f32>,
    pub commands: Vec<ActuatorCommand>,
    pub frame: String,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_one_json_line() {
        let ev = TickEvent {
            ts_unix_ms: 1_700_000_000_000,
            tick: 3,
            kind: EventKind::Holding,
            position: [1.0, 2.0, 0.0],
            target: None,
            confidence: Some(0.25),
            commands: vec![ActuatorCommand { channel: 0, value: -0.5 }],
            frame: "sbus 0f00dc05dc0500".into(),
            msg: "lost".into(),
        };
        let line = serde_json::to_string(&ev).unwrap();
        assert!(!line.contains('\n'));
        let back: TickEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back.kind, EventKind::Holding);
        assert_eq!(back.commands, ev.commands);
    }
}

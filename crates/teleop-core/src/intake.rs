//! Command intake: parse, validate, and deduplicate inbound `ctrl` frames.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

use crate::model::ControlSnapshot;
use crate::wire::{parse_inbound, CtrlWire, InboundFrame};

#[derive(Debug, Default, Clone, Copy)]
pub struct IntakeStats {
    pub accepted: u64,
    pub ctrl_drop_count: u64,
}

/// Outcome of handling one inbound `ctrl` frame, for logging/testing.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Accepted { seq: u64, latency_ms: Option<f64> },
    DroppedReplay { seq: u64, last_accepted_seq: u64 },
    DroppedMalformed(String),
}

/// Owns the latest-command slot and its statistics under a single mutex.
pub struct CommandIntake {
    latest: Arc<Mutex<Option<ControlSnapshot>>>,
    stats: Arc<Mutex<IntakeStats>>,
    last_accepted_seq: Mutex<Option<u64>>,
}

impl CommandIntake {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(IntakeStats::default())),
            last_accepted_seq: Mutex::new(None),
        }
    }

    /// Shared handle to the latest-command slot, for [`crate::integrator::VehicleIntegrator`].
    pub fn latest_handle(&self) -> Arc<Mutex<Option<ControlSnapshot>>> {
        self.latest.clone()
    }

    pub fn stats(&self) -> IntakeStats {
        *self.stats.lock().unwrap()
    }

    /// Handle one raw frame received on the `ctrl` channel. `now` is the
    /// current monotonic time, used to stamp `received_at`; `wall_now_ms` is
    /// the current wall-clock time in milliseconds, used only to compute
    /// `latency_ms` for observability.
    pub fn handle_ctrl_frame(&self, bytes: &[u8], now: Instant, wall_now_ms: i64) -> IntakeOutcome {
        let frame = match parse_inbound(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed ctrl frame");
                return IntakeOutcome::DroppedMalformed(err.to_string());
            }
        };

        let ctrl = match frame {
            InboundFrame::Ctrl(ctrl) => ctrl,
            InboundFrame::Heartbeat | InboundFrame::Estop => {
                // Routed elsewhere by the transport dispatcher; a ctrl-channel
                // frame of this shape is unusual but not malformed.
                return IntakeOutcome::DroppedMalformed(
                    "hb/estop frame received on ctrl channel intake path".to_string(),
                );
            }
        };

        let seq = match parse_seq(&ctrl) {
            Some(seq) => seq,
            None => {
                warn!("dropping ctrl frame with missing/non-integer seq");
                return IntakeOutcome::DroppedMalformed("missing or non-integer seq".to_string());
            }
        };

        let mut last_seq_guard = self.last_accepted_seq.lock().unwrap();
        if let Some(last) = *last_seq_guard {
            if seq <= last {
                drop(last_seq_guard);
                let mut stats = self.stats.lock().unwrap();
                stats.ctrl_drop_count += 1;
                debug!(seq, last_accepted_seq = last, "dropping replayed/reordered ctrl seq");
                return IntakeOutcome::DroppedReplay { seq, last_accepted_seq: last };
            }
        }
        *last_seq_guard = Some(seq);
        drop(last_seq_guard);

        let latency_ms = ctrl.t.map(|t| (wall_now_ms - t) as f64);

        let snapshot = ControlSnapshot {
            seq,
            throttle: ctrl.cmd.throttle.clamp(-1.0, 1.0),
            steer: ctrl.cmd.steer.clamp(-1.0, 1.0),
            brake: ctrl.cmd.brake.clamp(0.0, 1.0),
            mode: ctrl.cmd.mode,
            received_at: now,
            client_timestamp_ms: ctrl.t,
        };

        *self.latest.lock().unwrap() = Some(snapshot);
        {
            let mut stats = self.stats.lock().unwrap();
            stats.accepted += 1;
        }

        IntakeOutcome::Accepted { seq, latency_ms }
    }
}

impl Default for CommandIntake {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_seq(ctrl: &CtrlWire) -> Option<u64> {
    let n = ctrl.seq.as_i64()?;
    if n < 0 {
        return None;
    }
    Some(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: i64, throttle: f64) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": "ctrl",
            "seq": seq,
            "cmd": { "throttle": throttle, "steer": 0.0, "brake": 0.0, "mode": "arcade" }
        }))
        .unwrap()
    }

    #[test]
    fn accepts_strictly_increasing_seq() {
        let intake = CommandIntake::new();
        let now = Instant::now();
        assert!(matches!(
            intake.handle_ctrl_frame(&frame(1, 0.5), now, 0),
            IntakeOutcome::Accepted { seq: 1, .. }
        ));
        assert!(matches!(
            intake.handle_ctrl_frame(&frame(2, 0.5), now, 0),
            IntakeOutcome::Accepted { seq: 2, .. }
        ));
        assert_eq!(intake.stats().accepted, 2);
    }

    #[test]
    fn rejects_replayed_or_equal_seq() {
        let intake = CommandIntake::new();
        let now = Instant::now();
        intake.handle_ctrl_frame(&frame(5, 0.1), now, 0);
        let outcome = intake.handle_ctrl_frame(&frame(3, 0.9), now, 0);
        assert!(matches!(outcome, IntakeOutcome::DroppedReplay { seq: 3, last_accepted_seq: 5 }));
        assert_eq!(intake.stats().ctrl_drop_count, 1);

        let outcome = intake.handle_ctrl_frame(&frame(5, 0.9), now, 0);
        assert!(matches!(outcome, IntakeOutcome::DroppedReplay { seq: 5, .. }));

        let snapshot = intake.latest_handle().lock().unwrap().clone().unwrap();
        assert_eq!(snapshot.seq, 5);
        assert!((snapshot.throttle - 0.1).abs() < 1e-9);
    }

    #[test]
    fn clamps_out_of_range_fields() {
        let intake = CommandIntake::new();
        let now = Instant::now();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "type": "ctrl",
            "seq": 1,
            "cmd": { "throttle": 5.0, "steer": -9.0, "brake": 2.0, "mode": "x" }
        }))
        .unwrap();
        intake.handle_ctrl_frame(&bytes, now, 0);
        let snapshot = intake.latest_handle().lock().unwrap().clone().unwrap();
        assert_eq!(snapshot.throttle, 1.0);
        assert_eq!(snapshot.steer, -1.0);
        assert_eq!(snapshot.brake, 1.0);
    }

    #[test]
    fn missing_seq_is_dropped() {
        let intake = CommandIntake::new();
        let now = Instant::now();
        let bytes = br#"{"type":"ctrl","cmd":{"throttle":0.5}}"#;
        let outcome = intake.handle_ctrl_frame(bytes, now, 0);
        assert!(matches!(outcome, IntakeOutcome::DroppedMalformed(_)));
        assert!(intake.latest_handle().lock().unwrap().is_none());
    }

    #[test]
    fn negative_seq_is_dropped() {
        let intake = CommandIntake::new();
        let now = Instant::now();
        let outcome = intake.handle_ctrl_frame(&frame(-1, 0.5), now, 0);
        assert!(matches!(outcome, IntakeOutcome::DroppedMalformed(_)));
    }

    #[test]
    fn computes_latency_from_client_timestamp() {
        let intake = CommandIntake::new();
        let now = Instant::now();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "type": "ctrl",
            "seq": 1,
            "t": 1_000,
            "cmd": { "throttle": 0.0 }
        }))
        .unwrap();
        let outcome = intake.handle_ctrl_frame(&bytes, now, 1_200);
        match outcome {
            IntakeOutcome::Accepted { latency_ms: Some(latency), .. } => {
                assert!((latency - 200.0).abs() < 1e-9);
            }
            other => panic!("expected accepted with latency, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_dropped_silently_with_log() {
        let intake = CommandIntake::new();
        let now = Instant::now();
        let outcome = intake.handle_ctrl_frame(b"{not json", now, 0);
        assert!(matches!(outcome, IntakeOutcome::DroppedMalformed(_)));
    }
}

//! Fixed-cadence outbound `state` publication.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use tokio_util::sync::CancellationToken;

use crate::constants::{CTRL_STALE_WARN_AGE, HEARTBEAT_LOST_AGE, STATE_HZ};
use crate::integrator::VehicleIntegrator;
use crate::liveness::LivenessSupervisor;
use crate::model::VehicleSnapshot;
use crate::transport::{DataChannelTransport, TransportSession};
use crate::wire::{encode_compact, OutboundState, PoseWire, SimWire, StatusWire, VelWire};

#[derive(Debug, Default, Clone, Copy)]
pub struct PublisherStats {
    pub published: u64,
    pub send_failures: u64,
}

/// Composes outbound `state` frames from the integrator's snapshot and the
/// liveness supervisor's view of the link, at `STATE_HZ`.
pub struct StatePublisher {
    integrator: Arc<VehicleIntegrator>,
    liveness: Arc<LivenessSupervisor>,
    seq: AtomicU32,
    published: AtomicU32,
    send_failures: AtomicU32,
}

impl StatePublisher {
    pub fn new(integrator: Arc<VehicleIntegrator>, liveness: Arc<LivenessSupervisor>) -> Self {
        Self {
            integrator,
            liveness,
            seq: AtomicU32::new(0),
            published: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
        }
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed) as u64,
            send_failures: self.send_failures.load(Ordering::Relaxed) as u64,
        }
    }

    /// Compose and send one `state` frame on `label`. Returns `false` (and
    /// bumps the non-fatal failure counter) if the transport send fails --
    /// publication failures never stop the publish loop.
    pub async fn publish_once(&self, transport: &dyn DataChannelTransport, label: &str) -> bool {
        let snapshot = self.integrator.snapshot();
        let frame = self.compose(snapshot);

        let seq = frame.seq;
        let bytes = match encode_compact(&frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode outbound state frame");
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        match transport.send(label, &bytes).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(seq, "published state frame");
                true
            }
            Err(err) => {
                warn!(error = %err, seq, "state frame send failed");
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Run the publish loop at `STATE_HZ` until cancelled. Re-reads the
    /// session's current transport on every tick so it keeps publishing
    /// across reconnects; skips a tick silently while disconnected.
    pub async fn run(&self, session: &TransportSession, label: &str, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(publish_period());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("publish loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if let Some(transport) = session.current_transport() {
                        self.publish_once(&*transport, label).await;
                    }
                }
            }
        }
    }

    fn compose(&self, snapshot: VehicleSnapshot) -> OutboundState {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff;
        let hb_age = self.liveness.operator_heartbeat_age_secs();
        let status = status_for(&snapshot, hb_age, self.liveness.estop_triggered());

        OutboundState {
            kind: "state",
            seq,
            t: now_millis(),
            pose: PoseWire { x: snapshot.pose.x, y: snapshot.pose.y, z: snapshot.pose.z, yaw: snapshot.pose.yaw },
            vel: VelWire { vx: snapshot.velocity.vx, wz: snapshot.velocity.wz },
            sim: SimWire { dt: snapshot.last_dt },
            status,
        }
    }
}

/// Status-policy ordering: estop dominates, then no command
/// ever received, then command timeout, then command staleness warning, then
/// heartbeat loss, else ok. The sticky `estop_triggered` beacon is layered on
/// top of whichever branch matches as an independent `status.estop` flag; it
/// does not itself force `ok=false`/`msg="estop"` -- only the integrator's
/// live `estop_active` flag does, so a `clear_estop()` call is reflected in
/// `ok`/`msg` even though the sticky beacon keeps reporting `estop: true`.
fn status_for(snapshot: &VehicleSnapshot, hb_age: Option<f64>, estop_triggered: bool) -> StatusWire {
    let ctrl_latency_ms = snapshot.ctrl_age.map(|age| age * 1000.0);

    let mut status = if snapshot.estop_active {
        StatusWire {
            ok: false,
            msg: "estop".to_string(),
            hb_age,
            ctrl_latency_ms,
            estop: None,
        }
    } else {
        match snapshot.ctrl_age {
            None => StatusWire {
                ok: false,
                msg: "waiting ctrl".to_string(),
                hb_age,
                ctrl_latency_ms,
                estop: None,
            },
            Some(age) if age > crate::constants::ctrl_timeout().as_secs_f64() => StatusWire {
                ok: false,
                msg: format!("ctrl timeout {}ms", (age * 1000.0).round() as i64),
                hb_age,
                ctrl_latency_ms,
                estop: None,
            },
            Some(age) if age > CTRL_STALE_WARN_AGE.as_secs_f64() => StatusWire {
                ok: true,
                msg: format!("ctrl stale {}ms", (age * 1000.0).round() as i64),
                hb_age,
                ctrl_latency_ms,
                estop: None,
            },
            _ => match hb_age {
                Some(age) if age > HEARTBEAT_LOST_AGE.as_secs_f64() => StatusWire {
                    ok: false,
                    msg: "ui heartbeat lost".to_string(),
                    hb_age,
                    ctrl_latency_ms,
                    estop: None,
                },
                _ => StatusWire { ok: true, msg: String::new(), hb_age, ctrl_latency_ms, estop: None },
            },
        }
    };

    if estop_triggered {
        status.estop = Some(true);
    }
    status
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Target period between `state` frames.
pub fn publish_period() -> std::time::Duration {
    std::time::Duration::from_millis(1000 / STATE_HZ as u64)
}

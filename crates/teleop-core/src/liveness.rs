//! Heartbeat exchange and estop liveness bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::HEARTBEAT_PERIOD;
use crate::integrator::VehicleIntegrator;
use crate::model::LivenessState;
use crate::transport::{DataChannelTransport, TransportSession};
use crate::wire::{encode_compact, OutboundHeartbeat};

#[derive(Debug, Default, Clone, Copy)]
pub struct LivenessStats {
    pub heartbeats_sent: u64,
    pub heartbeats_received: u64,
    pub estop_frames_received: u64,
}

/// Outbound heartbeat cadence, inbound heartbeat age tracking, and the
/// sticky estop beacon: once triggered, never cleared except by process
/// restart. This is distinct from [`VehicleIntegrator::clear_estop`], which
/// only releases the physics override.
pub struct LivenessSupervisor {
    state: Mutex<LivenessState>,
    integrator: Arc<VehicleIntegrator>,
    estop_triggered: AtomicBool,
    sent: Mutex<u64>,
    received: Mutex<u64>,
    estop_frames: Mutex<u64>,
}

impl LivenessSupervisor {
    pub fn new(integrator: Arc<VehicleIntegrator>) -> Self {
        Self {
            state: Mutex::new(LivenessState::default()),
            integrator,
            estop_triggered: AtomicBool::new(false),
            sent: Mutex::new(0),
            received: Mutex::new(0),
            estop_frames: Mutex::new(0),
        }
    }

    pub fn stats(&self) -> LivenessStats {
        LivenessStats {
            heartbeats_sent: *self.sent.lock().unwrap(),
            heartbeats_received: *self.received.lock().unwrap(),
            estop_frames_received: *self.estop_frames.lock().unwrap(),
        }
    }

    pub fn estop_triggered(&self) -> bool {
        self.estop_triggered.load(Ordering::SeqCst)
    }

    pub fn operator_heartbeat_age_secs(&self) -> Option<f64> {
        let state = self.state.lock().unwrap();
        state.last_heartbeat_from_operator.map(|t| {
            SystemTime::now().duration_since(t).unwrap_or(Duration::ZERO).as_secs_f64()
        })
    }

    /// Record an inbound `hb` frame from the operator.
    pub fn handle_heartbeat(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_heartbeat_from_operator = Some(SystemTime::now());
        drop(state);
        *self.received.lock().unwrap() += 1;
        debug!("received operator heartbeat");
    }

    /// Record an inbound `estop` frame: trips the sticky beacon and forces
    /// the integrator into its estop override.
    pub fn handle_estop_frame(&self) {
        *self.estop_frames.lock().unwrap() += 1;
        self.trigger(EstopSource::RemoteFrame);
    }

    /// Local estop, e.g. `--estop` at startup or an operator console command.
    pub fn trigger_local_estop(&self) {
        self.trigger(EstopSource::Local);
    }

    fn trigger(&self, source: EstopSource) {
        let already = self.estop_triggered.swap(true, Ordering::SeqCst);
        self.integrator.trigger_estop();
        if !already {
            warn!(?source, "estop triggered; sticky until process restart");
        }
    }

    /// Run the outbound heartbeat loop (`HEARTBEAT_PERIOD`) until cancelled.
    /// Re-reads the session's current transport on every tick so it keeps
    /// working across reconnects; send failures are logged and do not stop
    /// the loop.
    pub async fn run_outbound(&self, session: &TransportSession, label: &str, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("heartbeat loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if let Some(transport) = session.current_transport() {
                        self.send_heartbeat(&*transport, label).await;
                    }
                }
            }
        }
    }

    async fn send_heartbeat(&self, transport: &dyn DataChannelTransport, label: &str) {
        let frame = OutboundHeartbeat::server(now_millis(), label);
        let bytes = match encode_compact(&frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode heartbeat");
                return;
            }
        };
        match transport.send(label, &bytes).await {
            Ok(()) => {
                *self.sent.lock().unwrap() += 1;
                let mut state = self.state.lock().unwrap();
                state.last_heartbeat_sent = Some(SystemTime::now());
            }
            Err(err) => warn!(error = %err, "heartbeat send failed"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EstopSource {
    RemoteFrame,
    Local,
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

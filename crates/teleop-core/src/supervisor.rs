//! Wires the five components into the five scheduling contexts and owns
//! their lifetimes, the way `mavkit::vehicle::VehicleInner` owns its single
//! event loop task -- extended here to fan out to five.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::PHYSICS_HZ;
use crate::error::ProtocolError;
use crate::intake::CommandIntake;
use crate::integrator::VehicleIntegrator;
use crate::liveness::LivenessSupervisor;
use crate::model::SessionState;
use crate::publisher::StatePublisher;
use crate::transport::{TransportConnector, TransportSession};
use crate::wire::{parse_inbound, InboundFrame};

/// Owns the five components and, once [`Supervisor::spawn`] is called, the
/// `tokio::spawn`ed tasks that drive them. Dropping the returned handles does
/// not stop the tasks; cancel the shared [`CancellationToken`] instead.
pub struct Supervisor {
    pub intake: Arc<CommandIntake>,
    pub integrator: Arc<VehicleIntegrator>,
    pub liveness: Arc<LivenessSupervisor>,
    pub publisher: Arc<StatePublisher>,
    pub session: Arc<TransportSession>,
}

impl Supervisor {
    pub fn new(estop_at_startup: bool) -> (Self, tokio::sync::watch::Receiver<SessionState>) {
        let intake = Arc::new(CommandIntake::new());
        let integrator = Arc::new(VehicleIntegrator::new(intake.latest_handle()));
        let liveness = Arc::new(LivenessSupervisor::new(integrator.clone()));
        let publisher = Arc::new(StatePublisher::new(integrator.clone(), liveness.clone()));
        let (session, session_state_rx) = TransportSession::new();

        if estop_at_startup {
            warn!("starting latched into emergency stop");
            liveness.trigger_local_estop();
        }

        (Self { intake, integrator, liveness, publisher, session }, session_state_rx)
    }

    /// Spawn every scheduling context: transport dispatch, inbound-frame
    /// routing, the physics tick, the state-publish loop, and the outbound
    /// heartbeat loop. Returns the join handles so the caller can bound
    /// shutdown by joining them after cancelling `cancel`.
    pub fn spawn(
        &self,
        connector: Arc<dyn TransportConnector>,
        ctrl_label: String,
        state_label: String,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let channel_labels = vec![ctrl_label.clone(), state_label.clone()];

        let mut tasks = Vec::with_capacity(5);

        tasks.push(tokio::spawn({
            let session = self.session.clone();
            let cancel = cancel.clone();
            async move { session.run(connector, channel_labels, cancel).await }
        }));

        tasks.push(tokio::spawn({
            let session = self.session.clone();
            let intake = self.intake.clone();
            let liveness = self.liveness.clone();
            let cancel = cancel.clone();
            async move { run_recv_loop(session, intake, liveness, cancel).await }
        }));

        tasks.push(tokio::spawn({
            let integrator = self.integrator.clone();
            let cancel = cancel.clone();
            async move { run_physics_loop(integrator, cancel).await }
        }));

        tasks.push(tokio::spawn({
            let publisher = self.publisher.clone();
            let session = self.session.clone();
            let cancel = cancel.clone();
            async move { publisher.run(&session, &state_label, cancel).await }
        }));

        tasks.push(tokio::spawn({
            let liveness = self.liveness.clone();
            let session = self.session.clone();
            let cancel = cancel.clone();
            async move { liveness.run_outbound(&session, &ctrl_label, cancel).await }
        }));

        tasks
    }
}

async fn run_recv_loop(
    session: Arc<TransportSession>,
    intake: Arc<CommandIntake>,
    liveness: Arc<LivenessSupervisor>,
    cancel: CancellationToken,
) {
    loop {
        let transport = match session.current_transport() {
            Some(t) => t,
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => continue,
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = transport.recv() => {
                match result {
                    Ok((label, bytes)) => handle_inbound_frame(&intake, &liveness, &label, &bytes),
                    Err(err) => {
                        warn!(error = %err, "transport recv failed; waiting for reconnect");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Route an inbound frame by its wire `type`, not the data-channel label it
/// arrived on: `hb` and `estop` are handled regardless of which channel
/// carried them.
fn handle_inbound_frame(intake: &CommandIntake, liveness: &LivenessSupervisor, label: &str, bytes: &[u8]) {
    let now = Instant::now();
    let wall_now_ms = now_millis();

    match parse_inbound(bytes) {
        Ok(InboundFrame::Ctrl(_)) => {
            let outcome = intake.handle_ctrl_frame(bytes, now, wall_now_ms);
            debug!(?outcome, label, "handled ctrl frame");
        }
        Ok(InboundFrame::Heartbeat) => liveness.handle_heartbeat(),
        Ok(InboundFrame::Estop) => liveness.handle_estop_frame(),
        Err(ProtocolError::UnknownType(kind)) => {
            warn!(kind, label, "dropping frame with unknown type");
        }
        Err(err) => {
            warn!(error = %err, label, "dropping malformed frame");
        }
    }
}

async fn run_physics_loop(integrator: Arc<VehicleIntegrator>, cancel: CancellationToken) {
    let mut ticker = interval(std::time::Duration::from_millis(1000 / PHYSICS_HZ as u64));
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                integrator.step(Instant::now());
            }
        }
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

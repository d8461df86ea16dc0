//! Data-channel transport boundary. The signaling/WebRTC stack itself is an
//! external collaborator, scoped out of this crate; what lives here is the
//! trait seam and the connection-lifecycle state machine that drives
//! whatever implements it.

pub mod mock;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::model::{SessionPhase, SessionState};

/// A bidirectional, labeled data channel transport. A real implementation
/// wraps a signaling client (e.g. Sora) and its negotiated WebRTC data
/// channels; [`mock::MockTransport`] stands in for tests and local dev.
#[async_trait]
pub trait DataChannelTransport: Send + Sync {
    /// Send one frame on the channel identified by `label`.
    async fn send(&self, label: &str, bytes: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame on any inbound channel, as `(label, bytes)`.
    /// Returns `Err(TransportError::Disconnected(..))` once the underlying
    /// connection is gone and will not recover on its own.
    async fn recv(&self) -> Result<(String, Vec<u8>), TransportError>;

    /// Whether `label` is currently open for sending.
    fn is_channel_ready(&self, label: &str) -> bool;

    /// Resolves once the transport has permanently disconnected. Never
    /// resolves on a healthy connection.
    async fn closed(&self);
}

/// Produces a fresh, already-connected transport for each connect attempt.
/// Kept separate from [`DataChannelTransport`] because one session may
/// cycle through many underlying connections.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DataChannelTransport>, TransportError>;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay before retrying after any disconnect (peer drop, send error, or a
/// failed `connect()` call that returned rather than timing out).
const DISCONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Delay before retrying after a connect attempt that ran past
/// [`CONNECT_TIMEOUT`] without resolving.
const CONNECT_TIMEOUT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Why the previous connect attempt or connection ended, used to select the
/// reconnect delay per spec.md: a 1s delay after any disconnect, a 2s delay
/// after a connect timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Disconnected,
    ConnectTimeout,
}

/// Drives the connect / reconnect lifecycle (Idle -> Connecting -> Connected
/// -> Disconnected), exposing [`SessionState`] to the
/// rest of the system over a watch channel. Each connect attempt is tagged
/// with a generation counter so a callback from a superseded attempt can
/// never clobber state a newer attempt already owns.
pub struct TransportSession {
    state_tx: watch::Sender<SessionState>,
    current: Mutex<Option<Arc<dyn DataChannelTransport>>>,
    generation: AtomicU64,
}

impl TransportSession {
    pub fn new() -> (Arc<Self>, watch::Receiver<SessionState>) {
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let session =
            Arc::new(Self { state_tx, current: Mutex::new(None), generation: AtomicU64::new(0) });
        (session, state_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn current_transport(&self) -> Option<Arc<dyn DataChannelTransport>> {
        self.current.lock().unwrap().clone()
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.state_tx.send_modify(|s| s.phase = phase);
    }

    /// Run the connect/reconnect loop until `cancel` fires. Intended to be
    /// spawned as one of the system's long-lived tasks. `channel_labels` are
    /// polled against the fresh transport once connected, populating
    /// [`SessionState::channel_ready`] for [`SessionState::is_channel_ready`].
    pub async fn run(
        self: Arc<Self>,
        connector: Arc<dyn TransportConnector>,
        channel_labels: Vec<String>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_phase(SessionPhase::Connecting);
            info!(generation, "connecting transport");

            let connect_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = timeout(CONNECT_TIMEOUT, connector.connect()) => result,
            };

            let transport: Arc<dyn DataChannelTransport> = match connect_result {
                Ok(Ok(transport)) => Arc::from(transport),
                Ok(Err(err)) => {
                    warn!(error = %err, "transport connect failed");
                    self.fail_and_wait(&cancel, FailureKind::Disconnected).await;
                    continue;
                }
                Err(_elapsed) => {
                    warn!("transport connect timed out");
                    self.fail_and_wait(&cancel, FailureKind::ConnectTimeout).await;
                    continue;
                }
            };

            if self.generation.load(Ordering::SeqCst) != generation {
                // a newer attempt already superseded this one; drop it.
                continue;
            }

            *self.current.lock().unwrap() = Some(transport.clone());
            let ready: std::collections::HashMap<String, bool> = channel_labels
                .iter()
                .map(|label| (label.clone(), transport.is_channel_ready(label)))
                .collect();
            self.state_tx.send_modify(|s| {
                s.phase = SessionPhase::Connected;
                s.connection_id = Some(format!("gen-{generation}"));
                s.channel_ready = ready;
            });
            info!("transport connected");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = transport.closed() => {}
            }

            if self.generation.load(Ordering::SeqCst) != generation {
                continue;
            }
            *self.current.lock().unwrap() = None;
            self.state_tx.send_modify(|s| {
                s.phase = SessionPhase::Disconnected;
                s.channel_ready.clear();
            });
            warn!("transport disconnected");
            self.wait_before_retry(&cancel, FailureKind::Disconnected).await;
        }
    }

    async fn fail_and_wait(&self, cancel: &CancellationToken, cause: FailureKind) {
        *self.current.lock().unwrap() = None;
        self.state_tx.send_modify(|s| {
            s.phase = SessionPhase::Disconnected;
            s.channel_ready.clear();
        });
        self.wait_before_retry(cancel, cause).await;
    }

    async fn wait_before_retry(&self, cancel: &CancellationToken, cause: FailureKind) {
        let delay = match cause {
            FailureKind::Disconnected => DISCONNECT_RETRY_DELAY,
            FailureKind::ConnectTimeout => CONNECT_TIMEOUT_RETRY_DELAY,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

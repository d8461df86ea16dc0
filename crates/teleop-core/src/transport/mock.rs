//! Deterministic in-process transport for tests and `--transport mock` dev
//! runs, standing in for the WebRTC/Sora data channel this crate treats as
//! an external collaborator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::{DataChannelTransport, TransportConnector};
use crate::error::TransportError;

/// A single sent frame, captured for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub label: String,
    pub bytes: Vec<u8>,
}

pub struct MockTransport {
    sent: Mutex<Vec<SentFrame>>,
    inbound_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
    ready_labels: Mutex<Vec<String>>,
    closed: Arc<Notify>,
    disconnected: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn new(ready_labels: &[&str]) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            ready_labels: Mutex::new(ready_labels.iter().map(|s| s.to_string()).collect()),
            closed: Arc::new(Notify::new()),
            disconnected: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Queue a frame for the next `recv()` call.
    pub fn push_inbound(&self, label: &str, bytes: Vec<u8>) {
        let _ = self.inbound_tx.send((label.to_string(), bytes));
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Simulate the remote end dropping the connection.
    pub fn disconnect(&self) {
        self.disconnected.store(true, std::sync::atomic::Ordering::SeqCst);
        self.closed.notify_waiters();
    }
}

#[async_trait]
impl DataChannelTransport for MockTransport {
    async fn send(&self, label: &str, bytes: &[u8]) -> Result<(), TransportError> {
        if self.disconnected.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TransportError::Disconnected("mock transport closed".to_string()));
        }
        if !self.is_channel_ready(label) {
            return Err(TransportError::NotReady(label.to_string()));
        }
        self.sent.lock().unwrap().push(SentFrame { label: label.to_string(), bytes: bytes.to_vec() });
        Ok(())
    }

    async fn recv(&self) -> Result<(String, Vec<u8>), TransportError> {
        let mut rx = self.inbound_rx.lock().unwrap();
        match rx.try_recv() {
            Ok(frame) => Ok(frame),
            Err(mpsc::error::TryRecvError::Empty) => {
                drop(rx);
                loop {
                    if self.disconnected.load(std::sync::atomic::Ordering::SeqCst) {
                        return Err(TransportError::Disconnected("mock transport closed".to_string()));
                    }
                    let mut rx = self.inbound_rx.lock().unwrap();
                    if let Ok(frame) = rx.try_recv() {
                        return Ok(frame);
                    }
                    drop(rx);
                    tokio::task::yield_now().await;
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(TransportError::Disconnected("mock transport closed".to_string()))
            }
        }
    }

    fn is_channel_ready(&self, label: &str) -> bool {
        !self.disconnected.load(std::sync::atomic::Ordering::SeqCst)
            && self.ready_labels.lock().unwrap().iter().any(|l| l == label)
    }

    async fn closed(&self) {
        if self.disconnected.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.closed.notified().await;
    }
}

/// Scripted sequence of connect outcomes, consumed one per attempt; the last
/// entry repeats once exhausted.
pub struct MockConnector {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    last: Mutex<Option<MockOutcome>>,
}

#[derive(Clone)]
pub enum MockOutcome {
    Connected(Arc<MockTransport>),
    Fail,
    Timeout,
}

impl MockConnector {
    pub fn new(outcomes: Vec<MockOutcome>) -> Self {
        Self { outcomes: Mutex::new(outcomes.into()), last: Mutex::new(None) }
    }

    pub fn always(outcome: MockOutcome) -> Self {
        Self::new(vec![outcome])
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn DataChannelTransport>, TransportError> {
        let next = {
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = outcomes.pop_front();
            if let Some(ref outcome) = outcome {
                *self.last.lock().unwrap() = Some(outcome.clone());
            }
            outcome.or_else(|| self.last.lock().unwrap().clone())
        };

        match next {
            Some(MockOutcome::Connected(transport)) => {
                Ok(Box::new(ArcTransport(transport)) as Box<dyn DataChannelTransport>)
            }
            Some(MockOutcome::Fail) | None => {
                Err(TransportError::Disconnected("mock connect failed".to_string()))
            }
            Some(MockOutcome::Timeout) => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!("connector timeout outcome should be raced against a shorter timeout")
            }
        }
    }
}

/// Wraps an `Arc<MockTransport>` so the same mock instance can be shared
/// between the test harness and [`TransportConnector::connect`]'s boxed
/// return value.
struct ArcTransport(Arc<MockTransport>);

#[async_trait]
impl DataChannelTransport for ArcTransport {
    async fn send(&self, label: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.0.send(label, bytes).await
    }

    async fn recv(&self) -> Result<(String, Vec<u8>), TransportError> {
        self.0.recv().await
    }

    fn is_channel_ready(&self, label: &str) -> bool {
        self.0.is_channel_ready(label)
    }

    async fn closed(&self) {
        self.0.closed().await
    }
}

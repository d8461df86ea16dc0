//! Shared state types for the control plane.

use std::collections::HashMap;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Most recently accepted control command.
///
/// Owned exclusively by [`crate::intake::CommandIntake`]; read by
/// [`crate::integrator::VehicleIntegrator`] under the same guard.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSnapshot {
    pub seq: u64,
    pub throttle: f64,
    pub steer: f64,
    pub brake: f64,
    pub mode: String,
    pub received_at: Instant,
    pub client_timestamp_ms: Option<i64>,
}

/// Planar pose. `y` is reserved for wire compatibility with the ground-plane
/// the source scene uses and is never written by the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
}

impl Default for Pose {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, yaw: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub wz: f64,
}

/// Authoritative kinematics, exclusively owned and mutated by
/// [`crate::integrator::VehicleIntegrator`] inside a single critical section
/// per physics tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleState {
    pub pose: Pose,
    pub velocity: Velocity,
}

/// Immutable copy of [`VehicleState`] plus derived fields, captured under the
/// integrator's lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleSnapshot {
    pub pose: Pose,
    pub velocity: Velocity,
    pub last_dt: f64,
    /// Age of the command in effect at this tick, if any command has ever
    /// been received.
    pub ctrl_age: Option<f64>,
    pub estop_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Idle
    }
}

/// Transport lifecycle state. Owned exclusively by `TransportSession`;
/// readers see it through a `tokio::sync::watch::Receiver`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub connection_id: Option<String>,
    pub channel_ready: HashMap<String, bool>,
}

impl SessionState {
    pub fn is_channel_ready(&self, label: &str) -> bool {
        self.phase == SessionPhase::Connected
            && self.channel_ready.get(label).copied().unwrap_or(false)
    }
}

/// Liveness bookkeeping. `estop_triggered` is sticky: once set, it is never
/// cleared except by process restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessState {
    pub last_heartbeat_from_operator: Option<SystemTime>,
    pub last_heartbeat_sent: Option<SystemTime>,
    pub estop_triggered: bool,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self {
            last_heartbeat_from_operator: None,
            last_heartbeat_sent: None,
            estop_triggered: false,
        }
    }
}

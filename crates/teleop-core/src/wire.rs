//! JSON wire formats for the control/state/heartbeat/estop protocol. Inbound frames are
//! dynamically typed; we peek at `"type"` first and dispatch rather than
//! deriving a single tagged enum, since unknown discriminants and malformed
//! payloads must be rejected (and logged) independently at the intake
//! boundary rather than failing the whole deserialization in one shot.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// A parsed, still-unvalidated inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Ctrl(CtrlWire),
    Heartbeat,
    Estop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CtrlWire {
    pub seq: serde_json::Value,
    #[serde(default)]
    pub t: Option<i64>,
    #[serde(default)]
    pub cmd: CtrlCommandWire,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CtrlCommandWire {
    #[serde(default)]
    pub throttle: f64,
    #[serde(default)]
    pub steer: f64,
    #[serde(default)]
    pub brake: f64,
    #[serde(default)]
    pub mode: String,
}

/// Parse raw bytes into a discriminated inbound frame. Returns
/// [`ProtocolError`] for malformed JSON, and `UnknownType` for any
/// discriminant other than `ctrl`, `hb`, `estop`.
pub fn parse_inbound(bytes: &[u8]) -> Result<InboundFrame, ProtocolError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    match envelope.kind.as_str() {
        "ctrl" => {
            let ctrl: CtrlWire = serde_json::from_slice(bytes)?;
            Ok(InboundFrame::Ctrl(ctrl))
        }
        "hb" => Ok(InboundFrame::Heartbeat),
        "estop" => Ok(InboundFrame::Estop),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoseWire {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VelWire {
    pub vx: f64,
    pub wz: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SimWire {
    pub dt: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusWire {
    pub ok: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hb_age: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctrl_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estop: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundState {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub seq: u32,
    pub t: u64,
    pub pose: PoseWire,
    pub vel: VelWire,
    pub sim: SimWire,
    pub status: StatusWire,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundHeartbeat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub t: u64,
    pub label: String,
}

impl OutboundHeartbeat {
    pub fn server(t: u64, label: &str) -> Self {
        Self { kind: "hb", role: "server", t, label: label.to_string() }
    }
}

/// Encode compactly (no inter-token whitespace).
pub fn encode_compact<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

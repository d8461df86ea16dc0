#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required signaling URL (set SORA_SIGNALING_URL or VITE_SORA_SIGNALING_URLS)")]
    MissingSignalingUrl,
    #[error("malformed metadata JSON: {0}")]
    MalformedMetadata(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("transport disconnected: {0}")]
    Disconnected(String),
    #[error("send failed on channel '{label}': {reason}")]
    SendFailed { label: String, reason: String },
    #[error("channel '{0}' is not ready")]
    NotReady(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing or non-integer seq")]
    BadSeq,
    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

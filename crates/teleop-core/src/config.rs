//! Startup configuration: environment variables with CLI overrides, per the
//! configuration surface in the external-interfaces contract.

use serde_json::Value as JsonValue;

use crate::error::ConfigError;

const DEFAULT_CHANNEL_ID: &str = "sora";
const DEFAULT_CTRL_LABEL: &str = "#ctrl";
const DEFAULT_STATE_LABEL: &str = "#state";

/// Overrides a caller (typically a `clap` CLI) may supply on top of the
/// environment. `None` means "use whatever the environment/default says".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub room: Option<String>,
    pub password: Option<String>,
    pub estop: bool,
}

/// Fully resolved startup configuration for the control plane.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub signaling_urls: Vec<String>,
    pub channel_id: String,
    pub ctrl_label: String,
    pub state_label: String,
    pub metadata: JsonValue,
    pub estop_at_startup: bool,
}

impl CoreConfig {
    /// Resolve configuration from the process environment, with `overrides`
    /// taking precedence where applicable (`--room` over channel id env
    /// vars, `--password` injected into `metadata.password`, `--estop`
    /// forcing `estop_at_startup`).
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let signaling_urls = signaling_urls_from_env()?;

        let channel_id = overrides
            .room
            .or_else(|| std::env::var("VITE_SORA_CHANNEL_ID").ok())
            .unwrap_or_else(|| DEFAULT_CHANNEL_ID.to_string());

        let ctrl_label = std::env::var("VITE_CTRL_LABEL").unwrap_or_else(|_| DEFAULT_CTRL_LABEL.to_string());
        let state_label = std::env::var("SORA_STATE_LABEL").unwrap_or_else(|_| DEFAULT_STATE_LABEL.to_string());

        let mut metadata = match std::env::var("SORA_METADATA") {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => JsonValue::Object(Default::default()),
        };
        if let Some(password) = overrides.password {
            if !metadata.is_object() {
                metadata = JsonValue::Object(Default::default());
            }
            if let JsonValue::Object(map) = &mut metadata {
                map.insert("password".to_string(), JsonValue::String(password));
            }
        }

        Ok(Self {
            signaling_urls,
            channel_id,
            ctrl_label,
            state_label,
            metadata,
            estop_at_startup: overrides.estop,
        })
    }
}

fn signaling_urls_from_env() -> Result<Vec<String>, ConfigError> {
    let raw = std::env::var("VITE_SORA_SIGNALING_URLS")
        .or_else(|_| std::env::var("SORA_SIGNALING_URL"))
        .map_err(|_| ConfigError::MissingSignalingUrl)?;

    let urls: Vec<String> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();

    if urls.is_empty() {
        return Err(ConfigError::MissingSignalingUrl);
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so runs don't interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "VITE_SORA_SIGNALING_URLS",
            "SORA_SIGNALING_URL",
            "VITE_SORA_CHANNEL_ID",
            "VITE_CTRL_LABEL",
            "SORA_STATE_LABEL",
            "SORA_METADATA",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_signaling_url_is_a_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = CoreConfig::load(CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSignalingUrl));
    }

    #[test]
    fn parses_comma_separated_urls_and_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SORA_SIGNALING_URL", "wss://a.example, wss://b.example");
        let cfg = CoreConfig::load(CliOverrides::default()).unwrap();
        assert_eq!(cfg.signaling_urls, vec!["wss://a.example", "wss://b.example"]);
        assert_eq!(cfg.channel_id, DEFAULT_CHANNEL_ID);
        assert_eq!(cfg.ctrl_label, DEFAULT_CTRL_LABEL);
        assert_eq!(cfg.state_label, DEFAULT_STATE_LABEL);
        clear_env();
    }

    #[test]
    fn cli_room_overrides_env_channel_id() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SORA_SIGNALING_URL", "wss://a.example");
        std::env::set_var("VITE_SORA_CHANNEL_ID", "env-room");
        let cfg = CoreConfig::load(CliOverrides { room: Some("cli-room".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(cfg.channel_id, "cli-room");
        clear_env();
    }

    #[test]
    fn cli_password_is_injected_into_metadata() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SORA_SIGNALING_URL", "wss://a.example");
        let cfg = CoreConfig::load(CliOverrides { password: Some("hunter2".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(cfg.metadata["password"], "hunter2");
        clear_env();
    }

    #[test]
    fn malformed_metadata_json_is_a_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SORA_SIGNALING_URL", "wss://a.example");
        std::env::set_var("SORA_METADATA", "{not json");
        let err = CoreConfig::load(CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedMetadata(_)));
        clear_env();
    }
}

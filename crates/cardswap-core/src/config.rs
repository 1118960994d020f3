use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cardswap_transport::PeerHandle;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Which inbound peers get a handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptPolicy {
    #[default]
    AcceptAll,
    RejectAll,
    /// Only peers whose transport handle is listed
    AllowList(Vec<String>),
}

impl AcceptPolicy {
    pub fn allows(&self, peer: &PeerHandle) -> bool {
        match self {
            AcceptPolicy::AcceptAll => true,
            AcceptPolicy::RejectAll => false,
            AcceptPolicy::AllowList(names) => names.iter().any(|n| n == peer.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Name placed in outgoing cards
    pub display_name: String,

    // Timeouts
    pub send_timeout_secs: u64,
    pub handshake_timeout_secs: u64, // 0 = wait forever
    /// How long handshakes that already sent a card may keep waiting after
    /// shutdown. 0 ends them at once.
    pub shutdown_grace_secs: u64,

    pub accept_policy: AcceptPolicy,

    /// Capacity of the exchange event broadcast channel
    pub event_buffer: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            display_name: "cardswap device".to_string(),
            send_timeout_secs: 5,
            handshake_timeout_secs: 30,
            shutdown_grace_secs: 5,
            accept_policy: AcceptPolicy::AcceptAll,
            event_buffer: 64,
        }
    }
}

impl ExchangeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ExchangeConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `CARDSWAP_*` environment variables.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("CARDSWAP_DISPLAY_NAME") {
            config.display_name = name;
        }
        if let Ok(secs) = std::env::var("CARDSWAP_SEND_TIMEOUT_SECS") {
            config.send_timeout_secs = parse_secs("CARDSWAP_SEND_TIMEOUT_SECS", &secs)?;
        }
        if let Ok(secs) = std::env::var("CARDSWAP_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout_secs = parse_secs("CARDSWAP_HANDSHAKE_TIMEOUT_SECS", &secs)?;
        }
        if let Ok(secs) = std::env::var("CARDSWAP_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace_secs = parse_secs("CARDSWAP_SHUTDOWN_GRACE_SECS", &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "display_name must not be empty".to_string(),
            ));
        }
        if !(1..=60).contains(&self.send_timeout_secs) {
            return Err(ConfigError::ValidationError(
                "send_timeout_secs must be between 1 and 60".to_string(),
            ));
        }
        if self.handshake_timeout_secs > 3600 {
            return Err(ConfigError::ValidationError(
                "handshake_timeout_secs must be at most 3600".to_string(),
            ));
        }
        if self.shutdown_grace_secs > 60 {
            return Err(ConfigError::ValidationError(
                "shutdown_grace_secs must be at most 60".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse_secs(var: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("{var}: expected whole seconds, got {value:?}")))
}

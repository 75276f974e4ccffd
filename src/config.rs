//! Configuration for the host listener and the gateway device.

use crate::types::KEY_COUNT;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lowest accepted offline timeout.
pub const MIN_OFFLINE_TIMEOUT: Duration = Duration::from_secs(5);

/// Main configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host listener settings
    pub host: HostSettings,

    /// Gateway device settings
    pub gateway: GatewaySettings,

    /// Path for the device identifier and persisted credentials
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keyrelay");

        Self {
            host: HostSettings::default(),
            gateway: GatewaySettings::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keyrelay")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Reject settings the runtime cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.gateway;
        for (name, key) in [
            ("reset_key", g.reset_key),
            ("legacy_key", g.legacy_key),
            ("confirmed_key", g.confirmed_key),
        ] {
            if key as usize >= KEY_COUNT {
                return Err(ConfigError::Invalid(format!(
                    "{name} {key} is outside 0..{KEY_COUNT}"
                )));
            }
        }
        if g.legacy_key == g.confirmed_key {
            return Err(ConfigError::Invalid(
                "legacy_key and confirmed_key must differ".to_string(),
            ));
        }
        if g.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if g.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Host listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Address to bind
    pub bind: String,
    /// Port to bind (0 for random)
    pub port: u16,
    /// Shared secret expected in `X-Matrix-Secret`
    pub secret: Option<String>,
    /// Silence after which a device is considered offline
    #[serde(with = "secs_serde")]
    pub offline_timeout: Duration,
    /// How often connectivity is re-evaluated
    #[serde(with = "secs_serde")]
    pub liveness_interval: Duration,
    /// Service name reported by `/health`
    pub name: String,
    /// Treat `seq == 1` with a lower uptime as a device reboot
    pub accept_reboot_reseed: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8787,
            secret: None,
            offline_timeout: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(5),
            name: "keyrelay-host".to_string(),
            accept_reboot_reseed: true,
        }
    }
}

impl HostSettings {
    /// Offline timeout with the floor applied.
    pub fn effective_offline_timeout(&self) -> Duration {
        self.offline_timeout.max(MIN_OFFLINE_TIMEOUT)
    }
}

/// Gateway device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Host listener address
    pub relay_host: String,
    pub relay_port: u16,
    pub relay_path: String,
    /// Shared secret sent in `X-Matrix-Secret`
    pub secret: Option<String>,
    /// Per-attempt timeout
    #[serde(with = "millis_serde")]
    pub attempt_timeout: Duration,
    /// Total delivery attempts per message
    pub max_attempts: u32,
    /// Wait before the first retry; doubles each retry
    #[serde(with = "millis_serde")]
    pub initial_backoff: Duration,
    pub long_press_ms: u64,
    pub debounce_ms: u64,
    pub reset_key: u8,
    #[serde(with = "millis_serde")]
    pub reset_window: Duration,
    #[serde(with = "millis_serde")]
    pub reset_hold: Duration,
    pub legacy_key: u8,
    pub confirmed_key: u8,
    /// Port of the device HTTP surface (display and health)
    pub api_port: u16,
    /// Outcomes waiting for the relay worker
    pub queue_depth: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            relay_host: "127.0.0.1".to_string(),
            relay_port: 8787,
            relay_path: "/event".to_string(),
            secret: None,
            attempt_timeout: Duration::from_millis(1_200),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            long_press_ms: crate::types::LONG_PRESS_THRESHOLD_MS,
            debounce_ms: crate::sensor::DEBOUNCE_MS,
            reset_key: 35,
            reset_window: Duration::from_millis(crate::gateway::boot::RESET_WINDOW_MS),
            reset_hold: Duration::from_millis(crate::gateway::boot::RESET_HOLD_MS),
            legacy_key: 0,
            confirmed_key: 1,
            api_port: 8080,
            queue_depth: 32,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod secs_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

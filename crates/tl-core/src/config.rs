use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.tasklink/config.toml`.
///
/// Credentials are never stored here; access tokens come from the token
/// source handed to the subscription controller at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Config {
    /// Load config from `~/.tasklink/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not expressible via types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.subscription.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tasklink")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Delay before the first reconnection attempt after a close.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Upper bound for the doubling reconnect delay.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    /// Lower-case substrings marking an error as a transient transport fault.
    #[serde(default = "default_transient_markers")]
    pub transient_error_markers: Vec<String>,
    /// Lower-case substrings marking an error as an authentication failure.
    #[serde(default = "default_auth_markers")]
    pub auth_error_markers: Vec<String>,
    /// Prefix of the per-task channel name (`{prefix}-{task_id}`).
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            transient_error_markers: default_transient_markers(),
            auth_error_markers: default_auth_markers(),
            channel_prefix: default_channel_prefix(),
        }
    }
}

impl SubscriptionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(ConfigError::Validation(format!(
                "subscription.max_reconnect_delay_ms ({}) must be >= reconnect_delay_ms ({})",
                self.max_reconnect_delay_ms, self.reconnect_delay_ms
            )));
        }
        if self.auth_error_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "subscription.auth_error_markers must contain at least one marker".into(),
            ));
        }
        if self.channel_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "subscription.channel_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    /// Channel carrying the events of one task.
    pub fn channel_for(&self, task_id: &str) -> String {
        format!("{}-{}", self.channel_prefix, task_id)
    }
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_max_reconnect_delay_ms() -> u64 {
    16_000
}
fn default_transient_markers() -> Vec<String> {
    [
        "stream",
        "socket",
        "connection reset",
        "connection closed",
        "broken pipe",
        "timeout",
        "timed out",
        "network",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_auth_markers() -> Vec<String> {
    [
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid token",
        "token expired",
        "authentication",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_channel_prefix() -> String {
    "task".into()
}

/// How chunks of one stream are ordered before they are concatenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOrdering {
    /// Concatenate in arrival order.
    #[default]
    Arrival,
    /// Drop a chunk whose `chunk_index` is not past the stored one.
    RejectStale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub chunk_ordering: ChunkOrdering,
    /// Maximum number of concurrently open streams per task (0 = unbounded).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            chunk_ordering: ChunkOrdering::default(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_max_in_flight() -> usize {
    256
}

use crate::shard::ShardInfo;
use serde::Deserialize;
use std::time::Duration;

/// Lower bound for the delay between login attempts
pub const MIN_BACKOFF: Duration = Duration::from_secs(60);

/// Configuration for a shard runtime
#[derive(Debug, Clone)]
pub struct ShardRuntimeConfig {
    /// Login/retry settings
    pub reconnect: ReconnectConfig,
    /// Fleet identity, `None` when not running under an orchestrator
    pub shard: Option<ShardInfo>,
    /// Capacity of the inbound coordination channel
    pub inbound_buffer: usize,
    /// Presence activity to set whenever the session becomes ready
    pub default_activity: Option<String>,
    /// Enable command handling on first startup
    pub enable_commands: bool,
}

impl Default for ShardRuntimeConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            shard: None,
            inbound_buffer: 100,
            default_activity: None,
            enable_commands: true,
        }
    }
}

impl ShardRuntimeConfig {
    /// Create a new builder for configuration
    pub fn builder() -> ShardRuntimeConfigBuilder {
        ShardRuntimeConfigBuilder::default()
    }

    /// Build a configuration from a JSON settings document.
    ///
    /// Every key is optional; missing keys keep their defaults. The shard
    /// identity is not part of the document, pass it with [`ShardRuntimeConfigBuilder::shard`]
    /// or load it with [`ShardInfo::from_env`].
    ///
    /// ```ignore
    /// let config = ShardRuntimeConfig::from_json(r#"{"refreshTimeMinutes": 10}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<ShardRuntimeConfig, ConfigError> {
        let raw: RawSettings =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidSettings(e.to_string()))?;

        let mut builder = Self::builder();
        if let Some(minutes) = raw.refresh_time_minutes {
            let interval = Duration::try_from_secs_f64(minutes * 60.0).map_err(|e| {
                ConfigError::InvalidSettings(format!("refreshTimeMinutes: {}", e))
            })?;
            builder = builder.refresh_interval(interval);
        }
        if let Some(max) = raw.max_login_attempts {
            builder = builder.max_attempts(max);
        }
        if let Some(secs) = raw.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(size) = raw.inbound_buffer {
            builder = builder.inbound_buffer(size);
        }
        if let Some(enabled) = raw.enable_commands {
            builder = builder.enable_commands(enabled);
        }
        builder = builder.default_activity(raw.default_activity.filter(|a| !a.is_empty()));
        builder.build()
    }

    /// Whether this process is part of a fleet at all
    pub fn is_orchestrated(&self) -> bool {
        self.shard.is_some()
    }

    /// Whether startup must wait for the orchestrator's start signal
    pub fn waits_for_start_signal(&self) -> bool {
        self.shard.is_some_and(|s| s.is_multi_member())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    refresh_time_minutes: Option<f64>,
    max_login_attempts: Option<u32>,
    connect_timeout_secs: Option<u64>,
    inbound_buffer: Option<usize>,
    default_activity: Option<String>,
    enable_commands: Option<bool>,
}

/// Builder for ShardRuntimeConfig
#[derive(Debug, Clone, Default)]
pub struct ShardRuntimeConfigBuilder {
    config: ShardRuntimeConfig,
}

impl ShardRuntimeConfigBuilder {
    /// Set reconnect configuration
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect = config;
        self
    }

    /// Set the feed refresh interval the backoff is derived from
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect.refresh_interval = interval;
        self
    }

    /// Set the attempt count at which the supervisor escalates
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.config.reconnect.max_attempts = max;
        self
    }

    /// Set the timeout for a single connection attempt
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.reconnect.connect_timeout = timeout;
        self
    }

    /// Set the fleet identity
    pub fn shard(mut self, shard: Option<ShardInfo>) -> Self {
        self.config.shard = shard;
        self
    }

    /// Set the inbound channel capacity
    pub fn inbound_buffer(mut self, size: usize) -> Self {
        self.config.inbound_buffer = size;
        self
    }

    /// Set the presence activity
    pub fn default_activity(mut self, activity: Option<String>) -> Self {
        self.config.default_activity = activity;
        self
    }

    /// Enable or disable command handling
    pub fn enable_commands(mut self, enabled: bool) -> Self {
        self.config.enable_commands = enabled;
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<ShardRuntimeConfig, ConfigError> {
        let reconnect = &self.config.reconnect;
        if reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidReconnect(
                "max_attempts cannot be 0".to_string(),
            ));
        }
        if reconnect.refresh_interval.is_zero() {
            return Err(ConfigError::InvalidReconnect(
                "refresh_interval must be > 0".to_string(),
            ));
        }
        if reconnect.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidReconnect(
                "connect_timeout must be > 0".to_string(),
            ));
        }

        if self.config.inbound_buffer == 0 {
            return Err(ConfigError::InvalidBuffer(
                "inbound_buffer cannot be 0".to_string(),
            ));
        }

        if let Some(shard) = &self.config.shard {
            shard.validate()?;
        }

        Ok(self.config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid reconnect configuration
    #[error("Invalid reconnect configuration: {0}")]
    InvalidReconnect(String),
    /// Invalid shard identity
    #[error("Invalid shard identity: {0}")]
    InvalidShard(String),
    /// Invalid channel buffer
    #[error("Invalid channel buffer: {0}")]
    InvalidBuffer(String),
    /// Settings document could not be read
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Login/retry configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Feed refresh interval; the retry delay is derived from it
    pub refresh_interval: Duration,
    /// Failed attempts after which the supervisor escalates (retries continue)
    pub max_attempts: u32,
    /// Timeout for a single connection attempt
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10 * 60),
            max_attempts: 5,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay between login attempts.
    ///
    /// Two and a half refresh intervals. Short results are stretched fourfold
    /// and the final value never drops below [`MIN_BACKOFF`]. The delay does not
    /// grow with the attempt number. Saturates at [`Duration::MAX`].
    pub fn backoff(&self) -> Duration {
        let scaled = self
            .refresh_interval
            .checked_mul(5)
            .map_or(Duration::MAX, |d| d / 2);
        let scaled = if scaled < MIN_BACKOFF { scaled * 4 } else { scaled };
        scaled.max(MIN_BACKOFF)
    }
}

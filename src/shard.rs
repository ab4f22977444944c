use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable carrying this process's shard id
pub const SHARD_ID_ENV: &str = "SHARD_ID";
/// Environment variable carrying the fleet size
pub const SHARD_COUNT_ENV: &str = "SHARD_COUNT";

/// Identity of this process within the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Shard identifier (0-indexed)
    pub id: u32,
    /// Total number of shards in the fleet
    pub count: u32,
}

impl ShardInfo {
    /// Create a shard identity
    pub fn new(id: u32, count: u32) -> Self {
        Self { id, count }
    }

    /// Read the shard identity set by the orchestrator.
    ///
    /// Returns `Ok(None)` when neither variable is set (the process is not
    /// running under an orchestrator).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_vars(
            std::env::var(SHARD_ID_ENV).ok().as_deref(),
            std::env::var(SHARD_COUNT_ENV).ok().as_deref(),
        )
    }

    fn from_vars(id: Option<&str>, count: Option<&str>) -> Result<Option<Self>, ConfigError> {
        match (id, count) {
            (None, None) => Ok(None),
            (Some(id), Some(count)) => {
                let id = id.trim().parse::<u32>().map_err(|e| {
                    ConfigError::InvalidShard(format!("{} is not a shard id: {}", SHARD_ID_ENV, e))
                })?;
                let count = count.trim().parse::<u32>().map_err(|e| {
                    ConfigError::InvalidShard(format!("{} is not a count: {}", SHARD_COUNT_ENV, e))
                })?;
                let info = Self { id, count };
                info.validate()?;
                Ok(Some(info))
            }
            _ => Err(ConfigError::InvalidShard(format!(
                "{} and {} must be set together",
                SHARD_ID_ENV, SHARD_COUNT_ENV
            ))),
        }
    }

    /// Check that the id falls inside the fleet
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::InvalidShard("shard count cannot be 0".to_string()));
        }
        if self.id >= self.count {
            return Err(ConfigError::InvalidShard(format!(
                "shard id {} out of range for {} shards",
                self.id, self.count
            )));
        }
        Ok(())
    }

    /// Whether other shards exist that this process must coordinate with
    pub fn is_multi_member(&self) -> bool {
        self.count > 1
    }
}

/// Log prefix identifying the shard, e.g. `[SHARD-3] `.
///
/// Renders as an empty string for processes outside a fleet so log lines read
/// the same either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardTag(pub Option<u32>);

impl From<Option<ShardInfo>> for ShardTag {
    fn from(shard: Option<ShardInfo>) -> Self {
        Self(shard.map(|s| s.id))
    }
}

impl fmt::Display for ShardTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "[SHARD-{}] ", id),
            None => Ok(()),
        }
    }
}

use crate::core::{Result, ShardError};
use crate::support::{RetryPolicy, duration_ms};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a replica set added without an explicit name is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardNamePolicy {
    /// Use the set name (`rs0`). Survives membership changes and failover.
    #[default]
    SetName,
    /// Use the full connection string (`rs0/hostA:27018,hostB:27018`) as
    /// discovered from the primary. Changes whenever membership does.
    ConnectionString,
}

/// Router configuration
///
/// Can be built in code or loaded from a JSON document:
///
/// ```
/// # use shardlink::RouterConfig;
/// let config = RouterConfig::from_json(
///     r#"{"retry": {"timeout_ms": 5000}, "shard_name_policy": "set_name"}"#,
/// ).unwrap();
/// assert_eq!(config.retry.timeout_ms, 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Bounds every wait: readiness probes, identity pushes, awareness polls.
    pub retry: RetryPolicy,
    pub shard_name_policy: ShardNamePolicy,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the overall timeout of each wait
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.retry.timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the replica-set naming policy
    pub fn shard_name_policy(mut self, policy: ShardNamePolicy) -> Self {
        self.shard_name_policy = policy;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.retry.validate()
    }

    /// Parse from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| ShardError::ParseError(format!("router config: {}", err)))?;
        config.validate().map_err(ShardError::ExecutionError)?;
        Ok(config)
    }
}

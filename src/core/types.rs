use super::error::{Result, ShardError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Port assumed for hosts listed without one.
pub const DEFAULT_SHARD_PORT: u16 = 27018;

/// Opaque cluster-wide token created once at genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(Uuid);

impl ClusterId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The cluster identity record held by the metadata authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIdentity {
    pub cluster_id: ClusterId,
}

impl ClusterIdentity {
    pub fn generate() -> Self {
        Self {
            cluster_id: ClusterId::generate(),
        }
    }
}

/// Role a node process was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClusterRole {
    #[default]
    None,
    ShardServer,
    ConfigServer,
}

/// Address of a standalone node or a replica set.
///
/// Written as `host:port` or `setName/hostA:port,hostB:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConnectionString {
    Standalone { host: String },
    ReplicaSet { set_name: String, hosts: Vec<String> },
}

impl ConnectionString {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ShardError::ParseError(
                "connection string must not be empty".to_string(),
            ));
        }

        match input.split_once('/') {
            Some((set_name, host_list)) => {
                let set_name = set_name.trim();
                if set_name.is_empty() || set_name.contains(',') {
                    return Err(ShardError::ParseError(format!(
                        "invalid replica set name in '{}'",
                        input
                    )));
                }
                let mut hosts: Vec<String> = Vec::new();
                for raw in host_list.split(',') {
                    let raw = raw.trim();
                    if raw.is_empty() {
                        continue;
                    }
                    let host = normalize_host(raw)?;
                    if !hosts.contains(&host) {
                        hosts.push(host);
                    }
                }
                if hosts.is_empty() {
                    return Err(ShardError::ParseError(format!(
                        "replica set connection string '{}' lists no hosts",
                        input
                    )));
                }
                Ok(Self::ReplicaSet {
                    set_name: set_name.to_string(),
                    hosts,
                })
            }
            None => {
                if input.contains(',') {
                    return Err(ShardError::ParseError(format!(
                        "'{}' lists several hosts without a replica set name",
                        input
                    )));
                }
                Ok(Self::Standalone {
                    host: normalize_host(input)?,
                })
            }
        }
    }

    pub fn standalone(host: &str) -> Result<Self> {
        Ok(Self::Standalone {
            host: normalize_host(host)?,
        })
    }

    pub fn replica_set(set_name: &str, hosts: &[&str]) -> Result<Self> {
        Self::parse(&format!("{}/{}", set_name, hosts.join(",")))
    }

    pub fn hosts(&self) -> Vec<&str> {
        match self {
            Self::Standalone { host } => vec![host.as_str()],
            Self::ReplicaSet { hosts, .. } => hosts.iter().map(String::as_str).collect(),
        }
    }

    pub fn set_name(&self) -> Option<&str> {
        match self {
            Self::Standalone { .. } => None,
            Self::ReplicaSet { set_name, .. } => Some(set_name.as_str()),
        }
    }

    pub fn is_replica_set(&self) -> bool {
        matches!(self, Self::ReplicaSet { .. })
    }

    /// Two strings name the same target when they are the same standalone host
    /// or the same replica set, whatever members each lists.
    pub fn same_target(&self, other: &ConnectionString) -> bool {
        match (self, other) {
            (Self::Standalone { host: a }, Self::Standalone { host: b }) => a == b,
            (Self::ReplicaSet { set_name: a, .. }, Self::ReplicaSet { set_name: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone { host } => f.write_str(host),
            Self::ReplicaSet { set_name, hosts } => write!(f, "{}/{}", set_name, hosts.join(",")),
        }
    }
}

impl TryFrom<String> for ConnectionString {
    type Error = ShardError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ConnectionString> for String {
    fn from(value: ConnectionString) -> Self {
        value.to_string()
    }
}

/// Normalizes `host[:port]`, applying [`DEFAULT_SHARD_PORT`] when the port is missing.
pub fn normalize_host(raw: &str) -> Result<String> {
    let raw = raw.trim();
    match raw.rsplit_once(':') {
        Some((name, port)) => {
            if name.is_empty() {
                return Err(ShardError::ParseError(format!("host missing in '{}'", raw)));
            }
            let port: u16 = port
                .parse()
                .map_err(|_| ShardError::ParseError(format!("invalid port in '{}'", raw)))?;
            Ok(format!("{}:{}", name, port))
        }
        None if raw.is_empty() => Err(ShardError::ParseError("empty host".to_string())),
        None => Ok(format!("{}:{}", raw, DEFAULT_SHARD_PORT)),
    }
}

/// One committed row of the shard registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRegistryEntry {
    #[serde(rename = "_id")]
    pub shard_name: String,
    #[serde(rename = "host")]
    pub connection_string: ConnectionString,
}

impl ShardRegistryEntry {
    pub fn new(shard_name: impl Into<String>, connection_string: ConnectionString) -> Self {
        Self {
            shard_name: shard_name.into(),
            connection_string,
        }
    }
}

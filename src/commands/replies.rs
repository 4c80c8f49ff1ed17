use crate::core::{ClusterId, ClusterRole, ShardError, ShardRegistryEntry};
use serde::{Deserialize, Serialize};

/// Liveness and role reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloReply {
    pub ready: bool,
    pub is_primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,
    /// Replica-set members, or the node itself when standalone.
    #[serde(default)]
    pub hosts: Vec<String>,
    pub me: String,
    #[serde(default)]
    pub cluster_role: ClusterRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddShardRequest {
    #[serde(rename = "addShard")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AddShardRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            name: None,
        }
    }

    pub fn named(target: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddShardResponse {
    pub success: bool,
    pub shard_added: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIdReply {
    pub cluster_id: ClusterId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListShardsReply {
    pub shards: Vec<ShardRegistryEntry>,
}

/// Reply for any failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandErrorReply {
    pub success: bool,
    pub errmsg: String,
    pub code: i32,
    pub code_name: String,
}

impl From<&ShardError> for CommandErrorReply {
    fn from(err: &ShardError) -> Self {
        Self {
            success: false,
            errmsg: err.to_string(),
            code: err.code(),
            code_name: err.code_name().to_string(),
        }
    }
}

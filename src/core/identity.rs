use super::error::{Result, ShardError};
use super::types::{ClusterId, ConnectionString};
use serde::{Deserialize, Serialize};

/// The record a shard node holds proving its admitted name, the cluster it
/// belongs to, and where the metadata authority lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardIdentityDocument {
    pub shard_name: String,
    pub cluster_id: ClusterId,
    pub config_connection_string: ConnectionString,
}

impl ShardIdentityDocument {
    pub fn new(
        shard_name: impl Into<String>,
        cluster_id: ClusterId,
        config_connection_string: ConnectionString,
    ) -> Self {
        Self {
            shard_name: shard_name.into(),
            cluster_id,
            config_connection_string,
        }
    }

    /// Checks that every field needed for the transition to aware is present.
    pub fn validate(&self) -> Result<()> {
        if self.shard_name.trim().is_empty() {
            return Err(ShardError::InvalidIdentity(
                "shardName must not be empty".to_string(),
            ));
        }
        if self.cluster_id.is_nil() {
            return Err(ShardError::InvalidIdentity(
                "clusterId must not be nil".to_string(),
            ));
        }
        Ok(())
    }

    /// Same shard of the same cluster; the config address may still differ.
    pub fn same_shard(&self, other: &ShardIdentityDocument) -> bool {
        self.shard_name == other.shard_name && self.cluster_id == other.cluster_id
    }
}

/// Sharding state as reported by a node's state query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingState {
    pub enabled: bool,
    #[serde(default)]
    pub config_server: String,
    #[serde(default)]
    pub shard_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
}

impl ShardingState {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_document(doc: &ShardIdentityDocument) -> Self {
        Self {
            enabled: true,
            config_server: doc.config_connection_string.to_string(),
            shard_name: doc.shard_name.clone(),
            cluster_id: Some(doc.cluster_id),
        }
    }

    /// True once the node reports `shard_name` as its identity.
    pub fn reports_shard(&self, shard_name: &str) -> bool {
        self.enabled && self.shard_name == shard_name
    }
}

/// Lifecycle of a node's shard identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShardAwareness {
    #[default]
    Uninitialized,
    Aware(ShardIdentityDocument),
}

impl ShardAwareness {
    pub fn is_aware(&self) -> bool {
        matches!(self, Self::Aware(_))
    }

    pub fn document(&self) -> Option<&ShardIdentityDocument> {
        match self {
            Self::Uninitialized => None,
            Self::Aware(doc) => Some(doc),
        }
    }

    pub fn sharding_state(&self) -> ShardingState {
        match self {
            Self::Uninitialized => ShardingState::disabled(),
            Self::Aware(doc) => ShardingState::from_document(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config() -> ConnectionString {
        ConnectionString::parse("configRS/cfg0:27019").unwrap()
    }

    #[test]
    fn nil_cluster_id_is_incomplete() {
        let doc = ShardIdentityDocument::new("s", ClusterId::from_uuid(Uuid::nil()), config());
        assert!(matches!(doc.validate(), Err(ShardError::InvalidIdentity(_))));
    }

    #[test]
    fn disabled_state_has_no_identity_fields() {
        let state = ShardAwareness::Uninitialized.sharding_state();
        assert!(!state.enabled);
        assert!(state.shard_name.is_empty());
        assert!(state.config_server.is_empty());
        assert!(state.cluster_id.is_none());
    }

    #[test]
    fn aware_state_mirrors_document() {
        let doc = ShardIdentityDocument::new("newShard", ClusterId::generate(), config());
        let state = ShardAwareness::Aware(doc.clone()).sharding_state();
        assert!(state.reports_shard("newShard"));
        assert_eq!(state.config_server, "configRS/cfg0:27019");
        assert_eq!(state.cluster_id, Some(doc.cluster_id));
    }
}

//! Shard node: liveness, the shard identity state machine, and its query surface.

pub mod identity_store;

pub use identity_store::{IDENTITY_FILE_NAME, IdentityStore};

use crate::authority::MetadataAuthority;
use crate::commands::HelloReply;
use crate::core::{
    ClusterRole, ConnectionString, Result, ShardAwareness, ShardError, ShardIdentityDocument,
    ShardingState, normalize_host,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{Instrument, Level, event, info_span};

/// Replica-set membership a node was started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetMembership {
    pub set_name: String,
    pub hosts: Vec<String>,
}

/// Startup options for a [`ShardNode`].
#[derive(Debug, Clone)]
pub struct ShardNodeOptions {
    pub host: String,
    pub data_dir: PathBuf,
    pub cluster_role: ClusterRole,
    pub replica_set: Option<ReplicaSetMembership>,
    /// Accept connections as soon as the node is opened.
    pub ready_on_open: bool,
    /// Start as primary. Always true for standalone nodes.
    pub primary: bool,
}

impl ShardNodeOptions {
    /// Options for a standalone node started in the shard-server role.
    pub fn new(host: &str, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.to_string(),
            data_dir: data_dir.into(),
            cluster_role: ClusterRole::ShardServer,
            replica_set: None,
            ready_on_open: true,
            primary: true,
        }
    }

    pub fn cluster_role(mut self, role: ClusterRole) -> Self {
        self.cluster_role = role;
        self
    }

    /// Makes the node a member of `set_name`; it starts as a secondary.
    pub fn replica_set(mut self, set_name: &str, hosts: &[&str]) -> Self {
        self.replica_set = Some(ReplicaSetMembership {
            set_name: set_name.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
        });
        self.primary = false;
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn ready_on_open(mut self, ready: bool) -> Self {
        self.ready_on_open = ready;
        self
    }
}

/// What an install did to the node's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// `UNINITIALIZED -> AWARE`.
    Installed,
    /// The node already held this exact document.
    Unchanged,
    /// Same shard and cluster; the config server address was refreshed.
    ConfigUpdated,
}

pub struct ShardNode {
    host: String,
    cluster_role: ClusterRole,
    replica_set: Option<ReplicaSetMembership>,
    store: IdentityStore,
    ready: AtomicBool,
    primary: AtomicBool,
    awareness: RwLock<ShardAwareness>,
}

impl ShardNode {
    /// Opens a node, reloading any identity document persisted in `data_dir`.
    pub async fn open(options: ShardNodeOptions) -> Result<Self> {
        let host = normalize_host(&options.host)?;
        let replica_set = match options.replica_set {
            Some(membership) => {
                let parsed = ConnectionString::replica_set(
                    &membership.set_name,
                    &membership
                        .hosts
                        .iter()
                        .map(String::as_str)
                        .collect::<Vec<_>>(),
                )?;
                Some(ReplicaSetMembership {
                    set_name: membership.set_name,
                    hosts: parsed.hosts().into_iter().map(str::to_string).collect(),
                })
            }
            None => None,
        };

        let store = IdentityStore::new(&options.data_dir);
        let awareness = match store.load().await? {
            Some(doc) => {
                event!(
                    Level::INFO,
                    host = %host,
                    shard = %doc.shard_name,
                    cluster_id = %doc.cluster_id,
                    "reloaded shard identity"
                );
                ShardAwareness::Aware(doc)
            }
            None => ShardAwareness::Uninitialized,
        };

        let primary = replica_set.is_none() || options.primary;
        Ok(Self {
            host,
            cluster_role: options.cluster_role,
            replica_set,
            store,
            ready: AtomicBool::new(options.ready_on_open),
            primary: AtomicBool::new(primary),
            awareness: RwLock::new(awareness),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn cluster_role(&self) -> ClusterRole {
        self.cluster_role
    }

    pub fn replica_set(&self) -> Option<&ReplicaSetMembership> {
        self.replica_set.as_ref()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Changes the node's replica-set role. Standalone nodes stay primary.
    pub fn set_primary(&self, primary: bool) {
        if self.replica_set.is_some() {
            self.primary.store(primary, Ordering::SeqCst);
        }
    }

    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }

    /// Liveness and role, independent of sharding state.
    pub fn probe_readiness(&self) -> HelloReply {
        HelloReply {
            ready: self.is_ready(),
            is_primary: self.is_primary(),
            set_name: self.replica_set.as_ref().map(|rs| rs.set_name.clone()),
            hosts: match &self.replica_set {
                Some(rs) => rs.hosts.clone(),
                None => vec![self.host.clone()],
            },
            me: self.host.clone(),
            cluster_role: self.cluster_role,
        }
    }

    /// Installs `doc` pushed by a router.
    ///
    /// Only a ready node accepts the push, and only the primary of a replica
    /// set. Both refusals are retryable.
    pub async fn install_identity(&self, doc: ShardIdentityDocument) -> Result<InstallOutcome> {
        if !self.is_ready() {
            return Err(ShardError::TargetUnreachable(format!(
                "node {} is not accepting connections",
                self.host
            )));
        }
        if !self.is_primary() {
            return Err(ShardError::TargetUnreachable(format!(
                "node {} is not primary",
                self.host
            )));
        }
        self.apply_identity(doc).await
    }

    /// Pulls this node's identity from the metadata authority.
    ///
    /// Returns whether the node is aware afterwards; a node with no registry
    /// entry yet stays uninitialized.
    pub async fn refresh_identity(&self, authority: &MetadataAuthority) -> Result<bool> {
        let set_name = self.replica_set.as_ref().map(|rs| rs.set_name.as_str());
        let Some(entry) = authority.find_for_member(&self.host, set_name).await? else {
            event!(Level::DEBUG, host = %self.host, "no registry entry for node yet");
            return Ok(self.awareness.read().await.is_aware());
        };
        let doc = authority.identity_document_for(&entry.shard_name).await?;
        self.apply_identity(doc).await?;
        Ok(true)
    }

    /// Pure read of the most recently installed identity.
    pub async fn query_sharding_state(&self) -> ShardingState {
        self.awareness.read().await.sharding_state()
    }

    pub async fn identity_document(&self) -> Option<ShardIdentityDocument> {
        self.awareness.read().await.document().cloned()
    }

    pub fn identity_path(&self) -> &std::path::Path {
        self.store.path()
    }

    async fn apply_identity(&self, doc: ShardIdentityDocument) -> Result<InstallOutcome> {
        doc.validate()?;
        let span = info_span!(
            "node.install_identity",
            host = %self.host,
            shard = %doc.shard_name,
            cluster_id = %doc.cluster_id
        );

        self.transition(doc).instrument(span).await
    }

    async fn transition(&self, doc: ShardIdentityDocument) -> Result<InstallOutcome> {
        let mut awareness = self.awareness.write().await;
        let outcome = match &*awareness {
            ShardAwareness::Aware(existing) if *existing == doc => {
                return Ok(InstallOutcome::Unchanged);
            }
            ShardAwareness::Aware(existing) if !existing.same_shard(&doc) => {
                event!(
                    Level::ERROR,
                    held_shard = %existing.shard_name,
                    held_cluster_id = %existing.cluster_id,
                    "refusing conflicting shard identity"
                );
                return Err(ShardError::AlreadyInitializedMismatch(format!(
                    "node {} is shard '{}' of cluster {}, cannot become shard '{}' of cluster {}",
                    self.host,
                    existing.shard_name,
                    existing.cluster_id,
                    doc.shard_name,
                    doc.cluster_id
                )));
            }
            ShardAwareness::Aware(_) => InstallOutcome::ConfigUpdated,
            ShardAwareness::Uninitialized => InstallOutcome::Installed,
        };

        self.store.save(&doc).await?;
        *awareness = ShardAwareness::Aware(doc);
        event!(Level::INFO, outcome = ?outcome, "shard identity persisted");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ClusterId;
    use tempfile::tempdir;

    fn doc(name: &str, cluster_id: ClusterId) -> ShardIdentityDocument {
        ShardIdentityDocument::new(
            name,
            cluster_id,
            ConnectionString::parse("configRS/cfg0:27019").unwrap(),
        )
    }

    #[tokio::test]
    async fn fresh_node_is_uninitialized_but_ready() {
        let dir = tempdir().unwrap();
        let node = ShardNode::open(ShardNodeOptions::new("h1", dir.path()))
            .await
            .unwrap();
        let hello = node.probe_readiness();
        assert!(hello.ready);
        assert!(hello.is_primary);
        assert_eq!(hello.me, "h1:27018");
        assert_eq!(node.query_sharding_state().await, ShardingState::disabled());
    }

    #[tokio::test]
    async fn install_is_idempotent_and_rejects_other_cluster() {
        let dir = tempdir().unwrap();
        let node = ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
            .await
            .unwrap();
        let cluster = ClusterId::generate();

        assert_eq!(
            node.install_identity(doc("s1", cluster)).await.unwrap(),
            InstallOutcome::Installed
        );
        assert_eq!(
            node.install_identity(doc("s1", cluster)).await.unwrap(),
            InstallOutcome::Unchanged
        );

        let err = node
            .install_identity(doc("s1", ClusterId::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::AlreadyInitializedMismatch(_)));
        let err = node.install_identity(doc("s2", cluster)).await.unwrap_err();
        assert!(matches!(err, ShardError::AlreadyInitializedMismatch(_)));

        let state = node.query_sharding_state().await;
        assert_eq!(state.shard_name, "s1");
        assert_eq!(state.cluster_id, Some(cluster));
    }

    #[tokio::test]
    async fn config_address_change_updates_in_place() {
        let dir = tempdir().unwrap();
        let node = ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
            .await
            .unwrap();
        let cluster = ClusterId::generate();
        node.install_identity(doc("s1", cluster)).await.unwrap();

        let moved = ShardIdentityDocument::new(
            "s1",
            cluster,
            ConnectionString::parse("configRS/cfg0:27019,cfg1:27019").unwrap(),
        );
        assert_eq!(
            node.install_identity(moved).await.unwrap(),
            InstallOutcome::ConfigUpdated
        );
        assert_eq!(
            node.query_sharding_state().await.config_server,
            "configRS/cfg0:27019,cfg1:27019"
        );
    }

    #[tokio::test]
    async fn restart_reloads_identity() {
        let dir = tempdir().unwrap();
        let cluster = ClusterId::generate();
        {
            let node = ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
                .await
                .unwrap();
            node.install_identity(doc("s1", cluster)).await.unwrap();
        }
        let node = ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
            .await
            .unwrap();
        assert!(node.query_sharding_state().await.reports_shard("s1"));
    }

    #[tokio::test]
    async fn secondaries_and_starting_nodes_refuse_pushes() {
        let dir = tempdir().unwrap();
        let secondary = ShardNode::open(
            ShardNodeOptions::new("h1:1", dir.path()).replica_set("rs0", &["h1:1", "h2:1"]),
        )
        .await
        .unwrap();
        let err = secondary
            .install_identity(doc("rs0", ClusterId::generate()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let dir = tempdir().unwrap();
        let starting = ShardNode::open(ShardNodeOptions::new("h3:1", dir.path()).ready_on_open(false))
            .await
            .unwrap();
        assert!(!starting.probe_readiness().ready);
        assert!(
            starting
                .install_identity(doc("s", ClusterId::generate()))
                .await
                .unwrap_err()
                .is_retryable()
        );
        assert!(!starting.query_sharding_state().await.enabled);
    }

    #[tokio::test]
    async fn incomplete_document_is_rejected() {
        let dir = tempdir().unwrap();
        let node = ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
            .await
            .unwrap();
        let err = node
            .install_identity(doc("", ClusterId::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::InvalidIdentity(_)));
        assert!(!node.query_sharding_state().await.enabled);
    }
}

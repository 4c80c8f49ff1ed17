// ============================================================================
// shardlink: shard awareness initialization
// ============================================================================

pub mod authority;
pub mod commands;
pub mod core;
pub mod node;
pub mod router;
pub mod support;
pub mod transport;

// Re-export main types for convenience
pub use authority::{
    FileRegistryStore, InMemoryRegistryStore, InsertOutcome, MetadataAuthority, RegistryStore,
};
pub use commands::{
    AddShardRequest, AddShardResponse, ClusterIdReply, CommandErrorReply, HelloReply,
    ListShardsReply, run_node_command, run_router_command,
};
pub use core::{
    ClusterId, ClusterIdentity, ClusterRole, ConnectionString, Result, ShardAwareness, ShardError,
    ShardIdentityDocument, ShardRegistryEntry, ShardingState,
};
pub use node::{InstallOutcome, ReplicaSetMembership, ShardNode, ShardNodeOptions};
pub use router::{Router, RouterConfig, ShardNamePolicy};
pub use support::{RetryPolicy, retry_with_backoff};
pub use transport::{InMemoryNodeNetwork, ShardNodeClient};

// ============================================================================
// Cluster fixture
// ============================================================================

use std::sync::Arc;

/// A metadata authority, an in-process node network and a router wired
/// together.
///
/// Each value is a separate cluster; nothing is global, so several can live
/// in one process.
///
/// # Examples
///
/// ```
/// use shardlink::{LocalCluster, ShardNode, ShardNodeOptions};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> shardlink::Result<()> {
/// let dir = std::env::temp_dir().join(format!("shardlink-doc-{}", std::process::id()));
/// let cluster = LocalCluster::start("configRS/cfg0:27019").await?;
///
/// let node = ShardNode::open(ShardNodeOptions::new("localhost:27018", &dir)).await?;
/// cluster.network().register(Arc::new(node)).await;
///
/// let name = cluster.router().add_shard_target("localhost:27018", Some("newShard")).await?;
/// let state = cluster.router().await_shard_awareness("localhost:27018", &name).await?;
/// assert!(state.enabled);
/// # std::fs::remove_dir_all(&dir).ok();
/// # Ok(())
/// # }
/// ```
pub struct LocalCluster {
    authority: Arc<MetadataAuthority>,
    network: InMemoryNodeNetwork,
    router: Router,
}

impl LocalCluster {
    /// Starts an in-memory cluster whose config servers answer at `config_server`.
    pub async fn start(config_server: &str) -> Result<Self> {
        Self::start_with_config(config_server, RouterConfig::default()).await
    }

    pub async fn start_with_config(config_server: &str, config: RouterConfig) -> Result<Self> {
        let authority = MetadataAuthority::in_memory(ConnectionString::parse(config_server)?);
        Self::from_authority(Arc::new(authority), config).await
    }

    /// Wires a router to an existing authority, running genesis if needed.
    pub async fn from_authority(
        authority: Arc<MetadataAuthority>,
        config: RouterConfig,
    ) -> Result<Self> {
        authority.initialize_cluster().await?;
        let network = InMemoryNodeNetwork::new();
        let router = Router::new(authority.clone(), Arc::new(network.clone()), config)?;
        Ok(Self {
            authority,
            network,
            router,
        })
    }

    pub fn authority(&self) -> &Arc<MetadataAuthority> {
        &self.authority
    }

    pub fn network(&self) -> &InMemoryNodeNetwork {
        &self.network
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn cluster_id(&self) -> Result<ClusterId> {
        Ok(self.authority.get_cluster_identity().await?.cluster_id)
    }
}

use super::ShardNodeClient;
use crate::commands::HelloReply;
use crate::core::{Result, ShardError, ShardIdentityDocument, ShardingState, normalize_host};
use crate::node::{InstallOutcome, ShardNode};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// An in-process network of shard nodes keyed by host.
///
/// Calls go straight to the registered node. Hosts that are not registered,
/// or that are partitioned, answer as unreachable.
#[derive(Clone, Default)]
pub struct InMemoryNodeNetwork {
    peers: Arc<Mutex<HashMap<String, Arc<ShardNode>>>>,
    partitioned: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryNodeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `node` reachable at its own host.
    pub async fn register(&self, node: Arc<ShardNode>) {
        let mut peers = self.peers.lock().await;
        peers.insert(node.host().to_string(), node);
    }

    /// Removes the node at `host`, as if its process stopped.
    pub async fn deregister(&self, host: &str) -> Result<Option<Arc<ShardNode>>> {
        let host = normalize_host(host)?;
        let mut peers = self.peers.lock().await;
        Ok(peers.remove(&host))
    }

    /// Cuts `host` off until [`InMemoryNodeNetwork::heal`] is called.
    pub async fn partition(&self, host: &str) -> Result<()> {
        let host = normalize_host(host)?;
        self.partitioned.lock().await.insert(host);
        Ok(())
    }

    pub async fn heal(&self, host: &str) -> Result<()> {
        let host = normalize_host(host)?;
        self.partitioned.lock().await.remove(&host);
        Ok(())
    }

    async fn peer(&self, host: &str) -> Result<Arc<ShardNode>> {
        let host = normalize_host(host)?;
        if self.partitioned.lock().await.contains(&host) {
            return Err(ShardError::TargetUnreachable(format!(
                "host {} is partitioned",
                host
            )));
        }
        let peers = self.peers.lock().await;
        peers.get(&host).cloned().ok_or_else(|| {
            ShardError::TargetUnreachable(format!("no route to host {}", host))
        })
    }
}

#[async_trait]
impl ShardNodeClient for InMemoryNodeNetwork {
    async fn hello(&self, host: &str) -> Result<HelloReply> {
        Ok(self.peer(host).await?.probe_readiness())
    }

    async fn sharding_state(&self, host: &str) -> Result<ShardingState> {
        Ok(self.peer(host).await?.query_sharding_state().await)
    }

    async fn install_identity(
        &self,
        host: &str,
        document: ShardIdentityDocument,
    ) -> Result<InstallOutcome> {
        let peer = self.peer(host).await?;
        peer.install_identity(document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ShardNodeOptions;
    use tempfile::tempdir;

    #[tokio::test]
    async fn unknown_and_partitioned_hosts_are_unreachable() {
        let dir = tempdir().unwrap();
        let network = InMemoryNodeNetwork::new();
        let node = ShardNode::open(ShardNodeOptions::new("h1", dir.path()))
            .await
            .unwrap();
        network.register(Arc::new(node)).await;

        assert!(network.hello("h1:27018").await.unwrap().ready);
        assert!(network.hello("h1").await.is_ok());
        assert!(network.hello("h2").await.unwrap_err().is_retryable());

        network.partition("h1").await.unwrap();
        assert!(network.sharding_state("h1").await.unwrap_err().is_retryable());
        network.heal("h1").await.unwrap();
        assert!(!network.sharding_state("h1").await.unwrap().enabled);

        assert!(network.deregister("h1").await.unwrap().is_some());
        assert!(network.hello("h1").await.is_err());
        assert!(network.deregister("h1").await.unwrap().is_none());
        assert!(matches!(
            network.deregister("h1:notaport").await,
            Err(ShardError::ParseError(_))
        ));
    }
}

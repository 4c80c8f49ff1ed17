pub mod in_memory;

pub use in_memory::InMemoryNodeNetwork;

use crate::commands::HelloReply;
use crate::core::{Result, ShardIdentityDocument, ShardingState};
use crate::node::InstallOutcome;
use async_trait::async_trait;

/// How the router reaches shard nodes.
///
/// An unreachable host yields [`crate::ShardError::TargetUnreachable`] so
/// callers can retry it.
#[async_trait]
pub trait ShardNodeClient: Send + Sync {
    /// Liveness and role query.
    async fn hello(&self, host: &str) -> Result<HelloReply>;

    /// Sharding-state query.
    async fn sharding_state(&self, host: &str) -> Result<ShardingState>;

    /// Pushes an identity document to the node at `host`.
    async fn install_identity(
        &self,
        host: &str,
        document: ShardIdentityDocument,
    ) -> Result<InstallOutcome>;
}

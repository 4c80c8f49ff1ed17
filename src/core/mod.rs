pub mod error;
pub mod identity;
pub mod types;

pub use error::{Result, ShardError};
pub use identity::{ShardAwareness, ShardIdentityDocument, ShardingState};
pub use types::{
    ClusterId, ClusterIdentity, ClusterRole, ConnectionString, DEFAULT_SHARD_PORT,
    ShardRegistryEntry, normalize_host,
};

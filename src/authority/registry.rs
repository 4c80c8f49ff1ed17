use crate::core::{ClusterIdentity, Result, ShardError, ShardRegistryEntry};
use crate::support::io_utils::{atomic_write, read_if_exists};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const REGISTRY_FILE_NAME: &str = "registry.json";
const REGISTRY_FORMAT_VERSION: u32 = 1;

/// Result of an atomic insert into the shard registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was new and is now committed.
    Inserted,
    /// The same name already maps to an equivalent target.
    AlreadyPresent(ShardRegistryEntry),
    /// The name is bound to a different target.
    NameTaken(ShardRegistryEntry),
    /// The target is registered under another name.
    TargetTaken(ShardRegistryEntry),
}

/// Durable key-value store behind the metadata authority.
///
/// `insert_entry` is a compare-and-insert keyed by shard name that also
/// checks target equivalence; implementations must make it atomic.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn cluster_identity(&self) -> Result<Option<ClusterIdentity>>;

    /// Stores `identity` unless one exists; returns whichever record won.
    async fn insert_cluster_identity_if_absent(
        &self,
        identity: ClusterIdentity,
    ) -> Result<ClusterIdentity>;

    async fn entries(&self) -> Result<Vec<ShardRegistryEntry>>;

    async fn insert_entry(&self, entry: ShardRegistryEntry) -> Result<InsertOutcome>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegistrySnapshot {
    version: u32,
    #[serde(default)]
    cluster_identity: Option<ClusterIdentity>,
    #[serde(default)]
    shards: BTreeMap<String, ShardRegistryEntry>,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            version: REGISTRY_FORMAT_VERSION,
            cluster_identity: None,
            shards: BTreeMap::new(),
        }
    }
}

impl RegistrySnapshot {
    fn insert_identity_if_absent(&mut self, identity: ClusterIdentity) -> (ClusterIdentity, bool) {
        match &self.cluster_identity {
            Some(existing) => (existing.clone(), false),
            None => {
                self.cluster_identity = Some(identity.clone());
                (identity, true)
            }
        }
    }

    fn try_insert(&mut self, entry: ShardRegistryEntry) -> InsertOutcome {
        if let Some(existing) = self.shards.get(&entry.shard_name) {
            return if existing.connection_string.same_target(&entry.connection_string) {
                InsertOutcome::AlreadyPresent(existing.clone())
            } else {
                InsertOutcome::NameTaken(existing.clone())
            };
        }
        if let Some(existing) = self
            .shards
            .values()
            .find(|e| e.connection_string.same_target(&entry.connection_string))
        {
            return InsertOutcome::TargetTaken(existing.clone());
        }
        self.shards.insert(entry.shard_name.clone(), entry);
        InsertOutcome::Inserted
    }

    fn entries(&self) -> Vec<ShardRegistryEntry> {
        self.shards.values().cloned().collect()
    }
}

/// Registry kept in process memory; lost when dropped.
#[derive(Debug, Default)]
pub struct InMemoryRegistryStore {
    state: Mutex<RegistrySnapshot>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn cluster_identity(&self) -> Result<Option<ClusterIdentity>> {
        Ok(self.state.lock()?.cluster_identity.clone())
    }

    async fn insert_cluster_identity_if_absent(
        &self,
        identity: ClusterIdentity,
    ) -> Result<ClusterIdentity> {
        Ok(self.state.lock()?.insert_identity_if_absent(identity).0)
    }

    async fn entries(&self) -> Result<Vec<ShardRegistryEntry>> {
        Ok(self.state.lock()?.entries())
    }

    async fn insert_entry(&self, entry: ShardRegistryEntry) -> Result<InsertOutcome> {
        Ok(self.state.lock()?.try_insert(entry))
    }
}

/// Registry persisted as a single JSON document under a directory.
///
/// Every mutation is written atomically before it becomes visible.
pub struct FileRegistryStore {
    path: PathBuf,
    state: tokio::sync::Mutex<RegistrySnapshot>,
}

impl FileRegistryStore {
    /// Opens the registry in `root`, loading any previously committed state.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let path = root.as_ref().join(REGISTRY_FILE_NAME);
        let state = match read_if_exists(&path).await? {
            Some(bytes) => {
                let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes).map_err(|err| {
                    ShardError::ParseError(format!(
                        "parse shard registry '{}': {}",
                        path.display(),
                        err
                    ))
                })?;
                if snapshot.version != REGISTRY_FORMAT_VERSION {
                    return Err(ShardError::ExecutionError(format!(
                        "unsupported shard registry version {} in '{}'",
                        snapshot.version,
                        path.display()
                    )));
                }
                snapshot
            }
            None => RegistrySnapshot::default(),
        };

        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(|err| {
            ShardError::ExecutionError(format!("serialize shard registry: {}", err))
        })?;
        atomic_write(&self.path, &json).await
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn cluster_identity(&self) -> Result<Option<ClusterIdentity>> {
        Ok(self.state.lock().await.cluster_identity.clone())
    }

    async fn insert_cluster_identity_if_absent(
        &self,
        identity: ClusterIdentity,
    ) -> Result<ClusterIdentity> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let (winner, inserted) = next.insert_identity_if_absent(identity);
        if inserted {
            self.write_snapshot(&next).await?;
            *guard = next;
        }
        Ok(winner)
    }

    async fn entries(&self) -> Result<Vec<ShardRegistryEntry>> {
        Ok(self.state.lock().await.entries())
    }

    async fn insert_entry(&self, entry: ShardRegistryEntry) -> Result<InsertOutcome> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let outcome = next.try_insert(entry);
        if outcome == InsertOutcome::Inserted {
            self.write_snapshot(&next).await?;
            *guard = next;
        }
        Ok(outcome)
    }
}

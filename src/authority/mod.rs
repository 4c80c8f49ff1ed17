//! Metadata authority: the shard registry and the cluster identity record.
//!
//! The authority is the single source of truth for shard names. Concurrent
//! add-shard calls are serialized only by the store's atomic
//! compare-and-insert, never by a lock held across a whole admission.

pub mod registry;

pub use registry::{
    FileRegistryStore, InMemoryRegistryStore, InsertOutcome, REGISTRY_FILE_NAME, RegistryStore,
};

use crate::core::{
    ClusterIdentity, ConnectionString, Result, ShardError, ShardIdentityDocument,
    ShardRegistryEntry,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{Level, event};

/// Names a caller may never register.
pub const RESERVED_SHARD_NAMES: &[&str] = &["config", "admin"];

const GENERATED_NAME_PREFIX: &str = "shard";
const MAX_NAME_ATTEMPTS: usize = 16;

pub struct MetadataAuthority {
    connection_string: ConnectionString,
    store: Arc<dyn RegistryStore>,
}

impl MetadataAuthority {
    pub fn new(connection_string: ConnectionString, store: Arc<dyn RegistryStore>) -> Self {
        Self {
            connection_string,
            store,
        }
    }

    /// Authority backed by an in-memory registry.
    pub fn in_memory(connection_string: ConnectionString) -> Self {
        Self::new(connection_string, Arc::new(InMemoryRegistryStore::new()))
    }

    /// Authority backed by a registry file under `root`.
    pub async fn open(connection_string: ConnectionString, root: impl AsRef<Path>) -> Result<Self> {
        let store = FileRegistryStore::open(root).await?;
        Ok(Self::new(connection_string, Arc::new(store)))
    }

    /// Address shard nodes are told to trust.
    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    /// Creates the cluster identity at genesis; later calls return the same record.
    pub async fn initialize_cluster(&self) -> Result<ClusterIdentity> {
        let identity = self
            .store
            .insert_cluster_identity_if_absent(ClusterIdentity::generate())
            .await?;
        event!(
            Level::INFO,
            cluster_id = %identity.cluster_id,
            "cluster identity available"
        );
        Ok(identity)
    }

    pub async fn get_cluster_identity(&self) -> Result<ClusterIdentity> {
        self.store.cluster_identity().await?.ok_or_else(|| {
            ShardError::NotInitialized(format!(
                "metadata authority '{}' has no cluster identity record",
                self.connection_string
            ))
        })
    }

    /// Picks the name `connection_string` will be registered under.
    ///
    /// Does not write; [`MetadataAuthority::commit_entry`] re-checks
    /// atomically, so a name returned here can still lose a race.
    pub async fn reserve_shard_name(
        &self,
        requested: Option<&str>,
        connection_string: &ConnectionString,
    ) -> Result<String> {
        if let Some(name) = requested {
            validate_shard_name(name)?;
        }
        let entries = self.store.entries().await?;

        if let Some(existing) = entries
            .iter()
            .find(|e| e.connection_string.same_target(connection_string))
        {
            return match requested {
                Some(name) if name != existing.shard_name => Err(ShardError::NameConflict(
                    name.to_string(),
                    format!(
                        "target {} is already registered as shard '{}'",
                        connection_string, existing.shard_name
                    ),
                )),
                _ => Ok(existing.shard_name.clone()),
            };
        }

        match requested {
            Some(name) => match entries.iter().find(|e| e.shard_name == name) {
                Some(existing) => Err(ShardError::NameConflict(
                    name.to_string(),
                    format!("'{}' is registered to {}", name, existing.connection_string),
                )),
                None => Ok(name.to_string()),
            },
            None => Ok(next_generated_name(&entries)),
        }
    }

    /// Durably commits `shard_name -> connection_string`.
    ///
    /// Committing an entry that already exists for the same target is a no-op.
    pub async fn commit_entry(
        &self,
        shard_name: &str,
        connection_string: &ConnectionString,
    ) -> Result<ShardRegistryEntry> {
        validate_shard_name(shard_name)?;
        let entry = ShardRegistryEntry::new(shard_name, connection_string.clone());

        match self.store.insert_entry(entry.clone()).await? {
            InsertOutcome::Inserted => {
                event!(
                    Level::INFO,
                    shard = %shard_name,
                    host = %connection_string,
                    "shard registry entry committed"
                );
                Ok(entry)
            }
            InsertOutcome::AlreadyPresent(existing) => Ok(existing),
            InsertOutcome::NameTaken(existing) => Err(ShardError::NameConflict(
                shard_name.to_string(),
                format!("'{}' is registered to {}", shard_name, existing.connection_string),
            )),
            InsertOutcome::TargetTaken(existing) => Err(ShardError::NameConflict(
                shard_name.to_string(),
                format!(
                    "target {} is already registered as shard '{}'",
                    connection_string, existing.shard_name
                ),
            )),
        }
    }

    /// Reserve and commit as one logical transaction.
    ///
    /// When the caller did not ask for a name, a commit that loses a race is
    /// retried with a freshly reserved name.
    pub async fn reserve_and_commit(
        &self,
        requested: Option<&str>,
        connection_string: &ConnectionString,
    ) -> Result<ShardRegistryEntry> {
        let mut attempt = 1;
        loop {
            let name = self.reserve_shard_name(requested, connection_string).await?;
            match self.commit_entry(&name, connection_string).await {
                Err(ShardError::NameConflict(_, reason))
                    if requested.is_none() && attempt < MAX_NAME_ATTEMPTS =>
                {
                    event!(
                        Level::DEBUG,
                        shard = %name,
                        attempt,
                        reason = %reason,
                        "generated shard name lost commit race"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn list_shards(&self) -> Result<Vec<ShardRegistryEntry>> {
        self.store.entries().await
    }

    pub async fn get_shard(&self, shard_name: &str) -> Result<Option<ShardRegistryEntry>> {
        Ok(self
            .store
            .entries()
            .await?
            .into_iter()
            .find(|e| e.shard_name == shard_name))
    }

    pub async fn find_by_target(
        &self,
        connection_string: &ConnectionString,
    ) -> Result<Option<ShardRegistryEntry>> {
        Ok(self
            .store
            .entries()
            .await?
            .into_iter()
            .find(|e| e.connection_string.same_target(connection_string)))
    }

    /// Entry a node at `host` belongs to, matched by replica-set name when the
    /// node is a set member and by host otherwise.
    pub async fn find_for_member(
        &self,
        host: &str,
        set_name: Option<&str>,
    ) -> Result<Option<ShardRegistryEntry>> {
        let entries = self.store.entries().await?;
        Ok(entries.into_iter().find(|e| match (&e.connection_string, set_name) {
            (ConnectionString::ReplicaSet { set_name: s, .. }, Some(mine)) => s == mine,
            (ConnectionString::Standalone { host: h }, None) => h == host,
            _ => false,
        }))
    }

    /// Builds the identity document a registered shard should hold.
    pub async fn identity_document_for(&self, shard_name: &str) -> Result<ShardIdentityDocument> {
        let identity = self.get_cluster_identity().await?;
        if self.get_shard(shard_name).await?.is_none() {
            return Err(ShardError::ExecutionError(format!(
                "shard '{}' is not registered",
                shard_name
            )));
        }
        Ok(ShardIdentityDocument::new(
            shard_name,
            identity.cluster_id,
            self.connection_string.clone(),
        ))
    }
}

pub fn validate_shard_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ShardError::InvalidShardName(
            "shard name must not be empty".to_string(),
        ));
    }
    if name.trim() != name {
        return Err(ShardError::InvalidShardName(format!(
            "shard name '{}' has surrounding whitespace",
            name
        )));
    }
    if RESERVED_SHARD_NAMES.contains(&name) {
        return Err(ShardError::InvalidShardName(format!(
            "'{}' is a reserved name",
            name
        )));
    }
    Ok(())
}

/// One above the highest `shardNNNN` suffix in use. When that suffix is
/// already `u32::MAX`, the lowest free suffix is used instead.
fn next_generated_name(entries: &[ShardRegistryEntry]) -> String {
    let used: BTreeSet<u32> = entries
        .iter()
        .filter_map(|e| e.shard_name.strip_prefix(GENERATED_NAME_PREFIX))
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .collect();
    let next = match used.last() {
        None => 0,
        Some(&highest) => highest.checked_add(1).unwrap_or_else(|| lowest_free(&used)),
    };
    format!("{}{:04}", GENERATED_NAME_PREFIX, next)
}

fn lowest_free(used: &BTreeSet<u32>) -> u32 {
    let mut candidate = 0;
    for &n in used {
        if n != candidate {
            break;
        }
        candidate = n.saturating_add(1);
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> MetadataAuthority {
        MetadataAuthority::in_memory(ConnectionString::parse("configRS/cfg0:27019").unwrap())
    }

    fn cs(s: &str) -> ConnectionString {
        ConnectionString::parse(s).unwrap()
    }

    #[tokio::test]
    async fn identity_lookup_fails_before_genesis() {
        let authority = authority();
        let err = authority.get_cluster_identity().await.unwrap_err();
        assert!(matches!(err, ShardError::NotInitialized(_)));

        let created = authority.initialize_cluster().await.unwrap();
        assert_eq!(authority.get_cluster_identity().await.unwrap(), created);
        assert_eq!(authority.initialize_cluster().await.unwrap(), created);
    }

    #[tokio::test]
    async fn generated_names_are_sequential() {
        let authority = authority();
        let a = authority.reserve_and_commit(None, &cs("h1:1")).await.unwrap();
        let b = authority.reserve_and_commit(None, &cs("h2:1")).await.unwrap();
        authority.commit_entry("custom", &cs("h3:1")).await.unwrap();
        let c = authority.reserve_and_commit(None, &cs("h4:1")).await.unwrap();
        assert_eq!(a.shard_name, "shard0000");
        assert_eq!(b.shard_name, "shard0001");
        assert_eq!(c.shard_name, "shard0002");
    }

    #[tokio::test]
    async fn generated_name_after_max_suffix_reuses_a_free_one() {
        let authority = authority();
        authority.commit_entry("shard0000", &cs("h0:1")).await.unwrap();
        authority.commit_entry("shard4294967295", &cs("h1:1")).await.unwrap();

        let entry = authority.reserve_and_commit(None, &cs("h2:1")).await.unwrap();
        assert_eq!(entry.shard_name, "shard0001");
    }

    #[tokio::test]
    async fn only_all_digit_suffixes_count_as_generated() {
        let authority = authority();
        authority.commit_entry("shard+7", &cs("h1:1")).await.unwrap();
        authority.commit_entry("shard-3", &cs("h2:1")).await.unwrap();
        authority.commit_entry("shard", &cs("h3:1")).await.unwrap();

        let entry = authority.reserve_and_commit(None, &cs("h4:1")).await.unwrap();
        assert_eq!(entry.shard_name, "shard0000");
    }

    #[tokio::test]
    async fn reserve_is_idempotent_for_the_same_target() {
        let authority = authority();
        authority.commit_entry("newShard", &cs("h1:1")).await.unwrap();

        assert_eq!(
            authority.reserve_shard_name(Some("newShard"), &cs("h1:1")).await.unwrap(),
            "newShard"
        );
        assert_eq!(
            authority.reserve_shard_name(None, &cs("h1:1")).await.unwrap(),
            "newShard"
        );
        assert_eq!(authority.list_shards().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn name_bound_to_other_target_conflicts() {
        let authority = authority();
        authority.commit_entry("newShard", &cs("h1:1")).await.unwrap();

        let err = authority
            .reserve_shard_name(Some("newShard"), &cs("h2:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::NameConflict(name, _) if name == "newShard"));

        let err = authority.commit_entry("newShard", &cs("h2:1")).await.unwrap_err();
        assert!(matches!(err, ShardError::NameConflict(_, _)));
    }

    #[tokio::test]
    async fn registered_target_cannot_take_a_second_name() {
        let authority = authority();
        authority.commit_entry("first", &cs("rs0/h1:1")).await.unwrap();
        let err = authority
            .reserve_shard_name(Some("second"), &cs("rs0/h2:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::NameConflict(_, _)));
    }

    #[tokio::test]
    async fn reserved_and_blank_names_are_rejected() {
        let authority = authority();
        for name in ["config", "admin", "", "  ", " padded"] {
            let err = authority
                .reserve_shard_name(Some(name), &cs("h1:1"))
                .await
                .unwrap_err();
            assert!(matches!(err, ShardError::InvalidShardName(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn member_lookup_matches_set_name_or_host() {
        let authority = authority();
        authority.commit_entry("rs0", &cs("rs0/h1:1,h2:1")).await.unwrap();
        authority.commit_entry("solo", &cs("h9:1")).await.unwrap();

        let by_set = authority.find_for_member("h3:1", Some("rs0")).await.unwrap();
        assert_eq!(by_set.unwrap().shard_name, "rs0");
        let by_host = authority.find_for_member("h9:1", None).await.unwrap();
        assert_eq!(by_host.unwrap().shard_name, "solo");
        assert!(authority.find_for_member("h1:1", None).await.unwrap().is_none());
    }
}

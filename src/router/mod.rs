//! Router: the add-shard admission handshake.
//!
//! `add_shard` runs four steps against one target:
//! 1. probe the target until it is ready and check its topology,
//! 2. negotiate the shard name with the metadata authority,
//! 3. commit the registry entry,
//! 4. push the shard identity document to the target's primary.
//!
//! A commit without a completed push leaves the shard registered but not yet
//! aware. Re-running `add_shard`, or calling `resume_identity_push`, finishes
//! it; every step is a no-op when already done.

pub mod config;

pub use config::{RouterConfig, ShardNamePolicy};

use crate::authority::{MetadataAuthority, validate_shard_name};
use crate::commands::{AddShardRequest, AddShardResponse, HelloReply};
use crate::core::{
    ClusterIdentity, ClusterRole, ConnectionString, Result, ShardError, ShardIdentityDocument,
    ShardRegistryEntry, ShardingState, normalize_host,
};
use crate::node::InstallOutcome;
use crate::support::retry_with_backoff;
use crate::transport::ShardNodeClient;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// A probed target: its canonical connection string and the host to push to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedTarget {
    connection_string: ConnectionString,
    primary_host: String,
}

pub struct Router {
    authority: Arc<MetadataAuthority>,
    client: Arc<dyn ShardNodeClient>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        authority: Arc<MetadataAuthority>,
        client: Arc<dyn ShardNodeClient>,
        config: RouterConfig,
    ) -> Result<Self> {
        config.validate().map_err(ShardError::ExecutionError)?;
        Ok(Self {
            authority,
            client,
            config,
        })
    }

    pub fn authority(&self) -> &Arc<MetadataAuthority> {
        &self.authority
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Admits `request.target` as a shard and returns the name it was given.
    pub async fn add_shard(&self, request: AddShardRequest) -> Result<AddShardResponse> {
        let span = info_span!(
            "router.add_shard",
            target = %request.target,
            requested_name = ?request.name
        );

        self.admit(request).instrument(span).await
    }

    async fn admit(&self, request: AddShardRequest) -> Result<AddShardResponse> {
        let target = ConnectionString::parse(&request.target).map_err(|err| {
            ShardError::InvalidShardTopology(format!(
                "invalid target '{}': {}",
                request.target, err
            ))
        })?;
        if let Some(name) = request.name.as_deref() {
            validate_shard_name(name)?;
        }
        let identity = self.authority.get_cluster_identity().await?;

        let resolved = self.resolve_target(&target).await?;
        event!(
            Level::DEBUG,
            primary = %resolved.primary_host,
            host = %resolved.connection_string,
            "target ready"
        );

        let state = self.current_sharding_state(&resolved.primary_host).await?;
        let requested = request
            .name
            .clone()
            .or_else(|| self.derive_shard_name(&resolved.connection_string));
        let requested = check_existing_identity(&state, &identity, requested)?;

        let entry = self
            .authority
            .reserve_and_commit(requested.as_deref(), &resolved.connection_string)
            .await?;

        let outcome = self.push_identity(&entry).await?;
        event!(
            Level::INFO,
            shard = %entry.shard_name,
            outcome = ?outcome,
            "shard added"
        );

        Ok(AddShardResponse {
            success: true,
            shard_added: entry.shard_name,
        })
    }

    /// Convenience wrapper returning just the final shard name.
    pub async fn add_shard_target(&self, target: &str, name: Option<&str>) -> Result<String> {
        let request = AddShardRequest {
            target: target.to_string(),
            name: name.map(str::to_string),
        };
        Ok(self.add_shard(request).await?.shard_added)
    }

    /// Completes the identity push for a shard already in the registry.
    pub async fn resume_identity_push(&self, shard_name: &str) -> Result<InstallOutcome> {
        let entry = self.authority.get_shard(shard_name).await?.ok_or_else(|| {
            ShardError::ExecutionError(format!("shard '{}' is not registered", shard_name))
        })?;
        self.push_identity(&entry).await
    }

    /// Polls `host` until its sharding state reports `shard_name`.
    pub async fn await_shard_awareness(
        &self,
        host: &str,
        shard_name: &str,
    ) -> Result<ShardingState> {
        let what = format!("shard awareness of {} as '{}'", host, shard_name);
        retry_with_backoff(&self.config.retry, &what, || async move {
            self.client
                .sharding_state(host)
                .await
                .map(|state| state.reports_shard(shard_name).then_some(state))
        })
        .await
    }

    pub async fn list_shards(&self) -> Result<Vec<ShardRegistryEntry>> {
        self.authority.list_shards().await
    }

    fn derive_shard_name(&self, connection_string: &ConnectionString) -> Option<String> {
        let set_name = connection_string.set_name()?;
        Some(match self.config.shard_name_policy {
            ShardNamePolicy::SetName => set_name.to_string(),
            ShardNamePolicy::ConnectionString => connection_string.to_string(),
        })
    }

    async fn resolve_target(&self, target: &ConnectionString) -> Result<ResolvedTarget> {
        let what = format!("readiness of {}", target);
        retry_with_backoff(&self.config.retry, &what, || self.probe_target(target)).await
    }

    async fn current_sharding_state(&self, host: &str) -> Result<ShardingState> {
        let what = format!("sharding state of {}", host);
        retry_with_backoff(&self.config.retry, &what, || async move {
            self.client.sharding_state(host).await.map(Some)
        })
        .await
    }

    /// Pushes the identity document, re-resolving the primary on every attempt.
    async fn push_identity(&self, entry: &ShardRegistryEntry) -> Result<InstallOutcome> {
        let document = self.authority.identity_document_for(&entry.shard_name).await?;
        let what = format!("identity push for shard '{}'", entry.shard_name);

        retry_with_backoff(&self.config.retry, &what, || {
            self.try_install(entry, document.clone())
        })
        .await
    }

    async fn try_install(
        &self,
        entry: &ShardRegistryEntry,
        document: ShardIdentityDocument,
    ) -> Result<Option<InstallOutcome>> {
        let Some(resolved) = self.probe_target(&entry.connection_string).await? else {
            return Ok(None);
        };
        self.client
            .install_identity(&resolved.primary_host, document)
            .await
            .map(Some)
    }

    /// One probe round. `Ok(None)` means "not ready yet".
    async fn probe_target(&self, target: &ConnectionString) -> Result<Option<ResolvedTarget>> {
        match target {
            ConnectionString::Standalone { host } => {
                let hello = self.client.hello(host).await?;
                if !hello.ready {
                    return Ok(None);
                }
                check_shard_server(host, &hello)?;
                if let Some(set_name) = hello.set_name.as_deref() {
                    return Err(ShardError::InvalidShardTopology(format!(
                        "host {} is a member of replica set '{}'; add it as '{}/{}'",
                        host, set_name, set_name, host
                    )));
                }
                Ok(Some(ResolvedTarget {
                    connection_string: target.clone(),
                    primary_host: host.clone(),
                }))
            }
            ConnectionString::ReplicaSet { set_name, hosts } => {
                let replies = join_all(hosts.iter().map(|host| self.client.hello(host))).await;

                for (host, reply) in hosts.iter().zip(replies) {
                    let hello = match reply {
                        Ok(hello) => hello,
                        Err(err) if err.is_retryable() => continue,
                        Err(err) => return Err(err),
                    };
                    if !hello.ready {
                        continue;
                    }
                    check_shard_server(host, &hello)?;
                    if hello.set_name.as_deref() != Some(set_name.as_str()) {
                        return Err(ShardError::InvalidShardTopology(format!(
                            "host {} reports replica set {:?}, expected '{}'",
                            host, hello.set_name, set_name
                        )));
                    }
                    if !hello.is_primary {
                        continue;
                    }
                    return resolve_primary(set_name, hosts, &hello).map(Some);
                }
                Ok(None)
            }
        }
    }
}

fn check_shard_server(host: &str, hello: &HelloReply) -> Result<()> {
    if hello.cluster_role != ClusterRole::ShardServer {
        return Err(ShardError::InvalidShardTopology(format!(
            "host {} was not started in the shard server role (role: {:?})",
            host, hello.cluster_role
        )));
    }
    Ok(())
}

/// Builds the canonical replica-set target from the primary's member list.
fn resolve_primary(set_name: &str, seeds: &[String], hello: &HelloReply) -> Result<ResolvedTarget> {
    let members = hello
        .hosts
        .iter()
        .map(|h| normalize_host(h))
        .collect::<Result<Vec<_>>>()?;
    if members.is_empty() {
        return Err(ShardError::InvalidShardTopology(format!(
            "primary {} of replica set '{}' exposes no member list",
            hello.me, set_name
        )));
    }
    if let Some(stranger) = seeds.iter().find(|seed| !members.contains(seed)) {
        return Err(ShardError::InvalidShardTopology(format!(
            "host {} is not a member of replica set '{}' (members: {})",
            stranger,
            set_name,
            members.join(",")
        )));
    }
    Ok(ResolvedTarget {
        connection_string: ConnectionString::ReplicaSet {
            set_name: set_name.to_string(),
            hosts: members,
        },
        primary_host: normalize_host(&hello.me)?,
    })
}

/// Refuses targets that already belong to another cluster or shard, and keeps
/// the name a node already holds when the caller did not pick one.
fn check_existing_identity(
    state: &ShardingState,
    identity: &ClusterIdentity,
    requested: Option<String>,
) -> Result<Option<String>> {
    if !state.enabled {
        return Ok(requested);
    }
    if state.cluster_id != Some(identity.cluster_id) {
        return Err(ShardError::AlreadyInitializedMismatch(format!(
            "target already belongs to cluster {:?} as shard '{}'",
            state.cluster_id.map(|id| id.to_string()),
            state.shard_name
        )));
    }
    match requested {
        Some(name) if name != state.shard_name => {
            Err(ShardError::AlreadyInitializedMismatch(format!(
                "target is already shard '{}' of this cluster, cannot rename it to '{}'",
                state.shard_name, name
            )))
        }
        Some(name) => Ok(Some(name)),
        None => Ok(Some(state.shard_name.clone())),
    }
}

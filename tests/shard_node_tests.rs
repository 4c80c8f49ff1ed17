use serde_json::json;
use shardlink::{
    ClusterId, ConnectionString, InstallOutcome, LocalCluster, MetadataAuthority, RetryPolicy,
    RouterConfig, ShardError, ShardIdentityDocument, ShardNode, ShardNodeOptions,
    run_node_command, run_router_command,
};
use std::sync::Arc;
use tempfile::tempdir;

const CONFIG_SERVER: &str = "configRS/cfg0:27019";

fn fast_config() -> RouterConfig {
    RouterConfig::new().retry(RetryPolicy {
        timeout_ms: 2_000,
        initial_backoff_ms: 1,
        max_backoff_ms: 20,
    })
}

#[tokio::test]
async fn aware_node_survives_restart() {
    let cluster = LocalCluster::start_with_config(CONFIG_SERVER, fast_config())
        .await
        .unwrap();
    let dir = tempdir().unwrap();
    let node = Arc::new(
        ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
            .await
            .unwrap(),
    );
    cluster.network().register(node.clone()).await;
    cluster.router().add_shard_target("h1:1", Some("s1")).await.unwrap();
    let before = node.query_sharding_state().await;

    assert!(cluster.network().deregister("h1:1").await.unwrap().is_some());
    drop(node);

    let restarted = ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
        .await
        .unwrap();
    assert_eq!(restarted.query_sharding_state().await, before);
    assert!(restarted.identity_path().exists());
}

#[tokio::test]
async fn conflicting_identity_leaves_state_unchanged() {
    let dir = tempdir().unwrap();
    let node = ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
        .await
        .unwrap();
    let config = ConnectionString::parse(CONFIG_SERVER).unwrap();
    let first = ShardIdentityDocument::new("s1", ClusterId::generate(), config.clone());
    assert_eq!(
        node.install_identity(first.clone()).await.unwrap(),
        InstallOutcome::Installed
    );

    let other_cluster = ShardIdentityDocument::new("s1", ClusterId::generate(), config.clone());
    let err = node.install_identity(other_cluster).await.unwrap_err();
    assert!(matches!(err, ShardError::AlreadyInitializedMismatch(_)));

    let other_name = ShardIdentityDocument::new("s2", first.cluster_id, config);
    let err = node.install_identity(other_name).await.unwrap_err();
    assert!(matches!(err, ShardError::AlreadyInitializedMismatch(_)));

    assert_eq!(node.identity_document().await, Some(first));
}

#[tokio::test]
async fn secondary_pulls_identity_from_authority() {
    let cluster = LocalCluster::start_with_config(CONFIG_SERVER, fast_config())
        .await
        .unwrap();
    let hosts = ["a:1", "b:1"];
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let primary = Arc::new(
        ShardNode::open(
            ShardNodeOptions::new("a:1", dir_a.path())
                .replica_set("rs0", &hosts)
                .primary(true),
        )
        .await
        .unwrap(),
    );
    let secondary = Arc::new(
        ShardNode::open(ShardNodeOptions::new("b:1", dir_b.path()).replica_set("rs0", &hosts))
            .await
            .unwrap(),
    );
    cluster.network().register(primary.clone()).await;
    cluster.network().register(secondary.clone()).await;

    assert!(!secondary.refresh_identity(cluster.authority()).await.unwrap());

    cluster.router().add_shard_target("rs0/a:1,b:1", None).await.unwrap();
    assert!(primary.query_sharding_state().await.reports_shard("rs0"));
    assert!(!secondary.query_sharding_state().await.enabled);

    assert!(secondary.refresh_identity(cluster.authority()).await.unwrap());
    assert_eq!(
        secondary.query_sharding_state().await,
        primary.query_sharding_state().await
    );
}

#[tokio::test]
async fn file_backed_authority_keeps_registry_and_identity() {
    let registry = tempdir().unwrap();
    let node_dir = tempdir().unwrap();
    let config = ConnectionString::parse(CONFIG_SERVER).unwrap();

    let cluster_id = {
        let authority = MetadataAuthority::open(config.clone(), registry.path())
            .await
            .unwrap();
        let cluster = LocalCluster::from_authority(Arc::new(authority), fast_config())
            .await
            .unwrap();
        let node = Arc::new(
            ShardNode::open(ShardNodeOptions::new("h1:1", node_dir.path()))
                .await
                .unwrap(),
        );
        cluster.network().register(node).await;
        cluster.router().add_shard_target("h1:1", Some("s1")).await.unwrap();
        cluster.cluster_id().await.unwrap()
    };

    let reopened = MetadataAuthority::open(config, registry.path()).await.unwrap();
    assert_eq!(reopened.get_cluster_identity().await.unwrap().cluster_id, cluster_id);
    assert_eq!(reopened.initialize_cluster().await.unwrap().cluster_id, cluster_id);
    let shards = reopened.list_shards().await.unwrap();
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].shard_name, "s1");
}

#[tokio::test]
async fn json_command_surface() {
    let cluster = LocalCluster::start_with_config(CONFIG_SERVER, fast_config())
        .await
        .unwrap();
    let dir = tempdir().unwrap();
    let node = Arc::new(
        ShardNode::open(ShardNodeOptions::new("h1:1", dir.path()))
            .await
            .unwrap(),
    );
    cluster.network().register(node.clone()).await;

    let reply = run_router_command(
        cluster.router(),
        &json!({"addShard": "h1:1", "name": "s1"}),
    )
    .await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["shardAdded"], "s1");

    let reply = run_router_command(cluster.router(), &json!({"listShards": 1})).await;
    assert_eq!(reply["shards"][0]["_id"], "s1");
    assert_eq!(reply["shards"][0]["host"], "h1:1");

    let reply = run_router_command(cluster.router(), &json!({"clusterId": 1})).await;
    let cluster_id = cluster.cluster_id().await.unwrap().to_string();
    assert_eq!(reply["clusterId"], cluster_id.as_str());

    let state = run_node_command(&node, &json!({"shardingState": 1})).await;
    assert_eq!(state["enabled"], true);
    assert_eq!(state["shardName"], "s1");
    assert_eq!(state["configServer"], CONFIG_SERVER);
    assert_eq!(state["clusterId"], cluster_id.as_str());

    let reply = run_router_command(
        cluster.router(),
        &json!({"addShard": "h1:1", "name": "config"}),
    )
    .await;
    assert_eq!(reply["success"], false);
    assert_eq!(reply["codeName"], "InvalidShardName");

    let reply = run_router_command(cluster.router(), &json!({"addShard": 7})).await;
    assert_eq!(reply["success"], false);
    assert_eq!(reply["codeName"], "FailedToParse");
}

//! JSON command surface for nodes and the router.
//!
//! A command is a JSON object whose command key names the operation, e.g.
//! `{"addShard": "rs0/hostA:27018", "name": "rs0"}` or `{"shardingState": 1}`.

pub mod replies;

pub use replies::{
    AddShardRequest, AddShardResponse, ClusterIdReply, CommandErrorReply, HelloReply,
    ListShardsReply,
};

use crate::core::{Result, ShardError};
use crate::node::ShardNode;
use crate::router::Router;
use serde::Serialize;
use serde_json::Value;

const NODE_COMMANDS: &[&str] = &["hello", "isMaster", "shardingState"];
const ROUTER_COMMANDS: &[&str] = &["addShard", "listShards", "clusterId"];

/// Finds which of `known` commands `command` invokes.
fn command_name<'a>(command: &Value, known: &[&'a str]) -> Result<&'a str> {
    let object = command.as_object().ok_or_else(|| {
        ShardError::ParseError("command must be a JSON object".to_string())
    })?;
    known
        .iter()
        .copied()
        .find(|name| object.contains_key(*name))
        .ok_or_else(|| {
            let keys: Vec<&str> = object.keys().map(String::as_str).collect();
            ShardError::ParseError(format!("no such command: {:?}", keys))
        })
}

fn to_reply<T: Serialize>(result: Result<T>) -> Value {
    let rendered = result.and_then(|value| serde_json::to_value(value).map_err(ShardError::from));
    match rendered {
        Ok(value) => value,
        Err(err) => error_reply(&err),
    }
}

pub fn error_reply(err: &ShardError) -> Value {
    serde_json::to_value(CommandErrorReply::from(err)).unwrap_or(Value::Null)
}

/// Runs a node-level command and renders the reply document.
pub async fn run_node_command(node: &ShardNode, command: &Value) -> Value {
    match command_name(command, NODE_COMMANDS) {
        Ok("hello") | Ok("isMaster") => to_reply(Ok(node.probe_readiness())),
        Ok("shardingState") => to_reply(Ok(node.query_sharding_state().await)),
        Ok(other) => error_reply(&ShardError::ParseError(format!("no such command: {}", other))),
        Err(err) => error_reply(&err),
    }
}

/// Runs a router-level command and renders the reply document.
pub async fn run_router_command(router: &Router, command: &Value) -> Value {
    match command_name(command, ROUTER_COMMANDS) {
        Ok("addShard") => {
            let request = serde_json::from_value::<AddShardRequest>(command.clone())
                .map_err(|err| ShardError::ParseError(format!("invalid addShard: {}", err)));
            match request {
                Ok(request) => to_reply(router.add_shard(request).await),
                Err(err) => error_reply(&err),
            }
        }
        Ok("listShards") => to_reply(
            router
                .list_shards()
                .await
                .map(|shards| ListShardsReply { shards }),
        ),
        Ok("clusterId") => to_reply(
            router
                .authority()
                .get_cluster_identity()
                .await
                .map(|identity| ClusterIdReply {
                    cluster_id: identity.cluster_id,
                }),
        ),
        Ok(other) => error_reply(&ShardError::ParseError(format!("no such command: {}", other))),
        Err(err) => error_reply(&err),
    }
}

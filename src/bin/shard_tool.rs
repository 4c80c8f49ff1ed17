use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use shardlink::node::IdentityStore;
use shardlink::{ConnectionString, ListShardsReply, MetadataAuthority, ShardingState};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "shard-tool")]
#[command(about = "Operator tooling for shard registries and shard identity documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the cluster identity record in a registry directory.
    InitCluster {
        #[arg(long)]
        registry: PathBuf,
        #[arg(long)]
        config_server: String,
    },
    /// Print the registered shards.
    ListShards {
        #[arg(long)]
        registry: PathBuf,
        #[arg(long)]
        config_server: String,
    },
    /// Print the sharding state a node's data directory would report.
    InspectIdentity {
        #[arg(long)]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::InitCluster {
            registry,
            config_server,
        } => {
            let authority = open_authority(&registry, &config_server).await?;
            let identity = authority
                .initialize_cluster()
                .await
                .context("initialize cluster identity")?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        Command::ListShards {
            registry,
            config_server,
        } => {
            let authority = open_authority(&registry, &config_server).await?;
            let shards = authority.list_shards().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&ListShardsReply { shards })?
            );
        }
        Command::InspectIdentity { data_dir } => {
            let store = IdentityStore::new(&data_dir);
            let state = match store
                .load()
                .await
                .with_context(|| format!("read {}", store.path().display()))?
            {
                Some(doc) => ShardingState::from_document(&doc),
                None => ShardingState::disabled(),
            };
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}

async fn open_authority(registry: &Path, config_server: &str) -> Result<MetadataAuthority> {
    let connection_string = ConnectionString::parse(config_server)
        .map_err(|err| anyhow!("invalid --config-server '{}': {}", config_server, err))?;
    MetadataAuthority::open(connection_string, registry)
        .await
        .with_context(|| format!("open registry {}", registry.display()))
}

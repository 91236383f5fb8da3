//! # hearth-node daemon
//!
//! Runs a community node on the libp2p transport:
//! - joins the configured community and replicates its log
//! - serves and fetches content-addressed files
//! - periodically retries downloads that never completed

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hearth_net::discovery::parse_multiaddrs;
use hearth_net::{keypair_from_seed, SwarmConfig, SwarmPubSub};
use hearth_node::{Node, NodeConfig};
use hearth_shared::Community;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const NODE_KEY_FILE: &str = "node.key";
const MISSING_FILES_SWEEP: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,hearth_node=debug,hearth_store=info,hearth_net=info")
        }))
        .init();

    info!("Starting hearth node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let community = match &config.community_id {
        Some(id) => {
            let mut community = Community::new(id.clone(), id.as_str());
            if let Some(path) = &config.root_ca_path {
                community.root_ca = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading root CA {}", path.display()))?;
            }
            Some(community)
        }
        None => None,
    };

    // -----------------------------------------------------------------------
    // 3. Spawn the libp2p transport
    // -----------------------------------------------------------------------
    let seed = load_or_create_seed(&config.data_dir.join(NODE_KEY_FILE)).await?;
    let keypair = keypair_from_seed(&seed)?;
    let swarm_config = SwarmConfig {
        bootstrap_peers_path: config.bootstrap_peers_path.clone(),
        listen_port: config.listen_port,
        extra_dials: community
            .as_ref()
            .map(|c| parse_multiaddrs(c.peer_list.iter().map(String::as_str)))
            .unwrap_or_default(),
    };
    let (transport, events) = SwarmPubSub::spawn(keypair, swarm_config).await?;
    let transport = Arc::new(transport);
    info!(peer_id = %hearth_net::PubSub::local_peer_id(transport.as_ref()), "Transport running");

    // -----------------------------------------------------------------------
    // 4. Launch communities and route traffic
    // -----------------------------------------------------------------------
    let node = Arc::new(Node::from_config(&config, transport.clone()));
    if let Some(community) = &community {
        node.launch_community(community).await?;
    } else {
        warn!("No HEARTH_COMMUNITY_ID set, node is idle");
    }
    let router = node.spawn(events);

    let sweeper = Arc::clone(&node);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MISSING_FILES_SWEEP);
        loop {
            interval.tick().await;
            for id in sweeper.communities().await {
                match sweeper.check_for_missing_files(&id).await {
                    Ok(0) => {}
                    Ok(started) => info!(community = %id, started, "Retrying missing files"),
                    Err(e) => warn!(community = %id, error = %e, "Missing file sweep failed"),
                }
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run until the transport stops or Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        _ = router => {
            warn!("Transport event stream ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    node.shutdown().await?;
    if let Err(e) = transport.shutdown().await {
        warn!(error = %e, "Transport already stopped");
    }
    Ok(())
}

/// Read the node's key seed, creating a fresh one on first start.
async fn load_or_create_seed(path: &Path) -> anyhow::Result<[u8; 32]> {
    if let Ok(existing) = tokio::fs::read_to_string(path).await {
        let bytes = hex::decode(existing.trim()).context("node key is not hex")?;
        return bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("node key must be 32 bytes"));
    }
    let seed: [u8; 32] = rand::random();
    tokio::fs::write(path, hex::encode(seed))
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Generated node key");
    Ok(seed)
}

//! The Arx aggregator node.
//!
//! Wires the shared-database stores, the SMT, the round pipeline, leader
//! election, the follower synchronizer, and the JSON-RPC gateway into one
//! process, then supervises them until shutdown. Construction order
//! matters: the tree is fully reloaded from the leaf store before the
//! change-feed consumer or the gateway exist.

mod config;

use anyhow::{anyhow, bail, Context, Result};
use arx_api::anchor::TrustAnchorClient;
use arx_api::rpc::AggregatorApi;
use arx_api::store::{BlockStore, CursorStore, LeafStore, PendingQueue, RecordStore};
use arx_cluster::{ElectionConfig, LeadershipCoordinator, SmtSynchronizer, SynchronizerConfig};
use arx_engine::{
    reload_smt, Aggregator, BlockProducer, HttpAnchorClient, MockAnchorClient, RoundConfig,
    RoundManager,
};
use arx_gateway::{GatewayConfig, ReceiptSigner};
use arx_smt::SparseMerkleTree;
use arx_storage::Database;
use arx_types::cluster::{feed_stream_id, ReplicaRole};
use arx_types::config::NodeConfig;
use arx_types::hash::DataHash;
use clap::Parser;
use k256::ecdsa::SigningKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

fn parse_signing_key(raw: &str) -> Result<SigningKey> {
    let bytes = hex::decode(raw.trim()).context("anchor.private_key is not valid hex")?;
    SigningKey::from_slice(&bytes).map_err(|e| anyhow!("anchor.private_key is invalid: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    arx_telemetry::init_tracing()?;
    arx_telemetry::install_metrics();

    let options = config::Options::parse();
    let node_config = options.load()?;
    let initial_block_hash = node_config
        .validate()
        .map_err(|e| anyhow!("configuration rejected: {e}"))?;

    run(node_config, initial_block_hash).await
}

async fn run(config: NodeConfig, initial_block_hash: DataHash) -> Result<()> {
    let server_id = config.server_id.clone();
    tracing::info!(target: "node", server_id = %server_id, "starting arx-node");

    let db = Database::connect(&config.storage.uri)
        .await
        .map_err(|e| anyhow!("database connection failed: {e}"))?;
    let records: Arc<dyn RecordStore> = Arc::new(db.records());
    let queue: Arc<dyn PendingQueue> = Arc::new(db.queue());
    let blocks: Arc<dyn BlockStore> = Arc::new(db.blocks());
    let leaves: Arc<dyn LeafStore> = Arc::new(db.leaves());
    let cursors: Arc<dyn CursorStore> = Arc::new(db.cursors());

    // Rebuild the witness tree before anything can observe or mutate it.
    let smt = Arc::new(RwLock::new(SparseMerkleTree::new()));
    let loaded = reload_smt(leaves.as_ref(), &smt)
        .await
        .map_err(|e| anyhow!("SMT reload failed: {e}"))?;
    tracing::info!(target: "node", leaves = loaded, "witness tree ready");

    let signing_key = config
        .anchor
        .private_key
        .as_deref()
        .map(parse_signing_key)
        .transpose()?;
    let anchor: Arc<dyn TrustAnchorClient> = match (&config.anchor.token_partition_url, &signing_key)
    {
        (Some(url), Some(key)) => Arc::new(HttpAnchorClient::new(
            url.clone(),
            key.clone(),
            config.anchor.network_id.clone(),
            config.anchor.token_partition_id,
        )),
        (Some(_), None) => {
            bail!("anchor.private_key is required when anchor.token_partition_url is set")
        }
        (None, _) => {
            tracing::warn!(
                target: "node",
                "no anchor.token_partition_url configured, using the in-process mock anchor"
            );
            Arc::new(MockAnchorClient::new())
        }
    };

    let round = Arc::new(RoundManager::new(
        Arc::clone(&smt),
        Arc::clone(&records),
        Arc::clone(&queue),
        Arc::clone(&leaves),
        Arc::clone(&blocks),
        anchor,
        RoundConfig {
            chain_id: config.chain_id,
            version: config.version,
            fork_id: config.fork_id,
            initial_block_hash,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<String>(1);

    // Leadership: elected over the shared lease, or unconditional when
    // high availability is off.
    let mut election_handle = None;
    let (_standalone_role_tx, role_rx) = if config.high_availability.enabled {
        let (coordinator, role_rx) = LeadershipCoordinator::new(
            Arc::new(db.lease()),
            server_id.clone(),
            ElectionConfig::from(&config.high_availability),
        );
        let shutdown = shutdown_rx.clone();
        election_handle = Some(tokio::spawn(async move {
            if let Err(e) = coordinator.run(shutdown).await {
                tracing::error!(target: "node", error = %e, "leader election stopped");
            }
        }));
        (None, role_rx)
    } else {
        tracing::info!(target: "node", "high availability disabled, running as standalone leader");
        let (tx, rx) = watch::channel(ReplicaRole::Leader);
        (Some(tx), rx)
    };

    let producer_handle = tokio::spawn(
        BlockProducer::new(Arc::clone(&round)).run(role_rx.clone(), shutdown_rx.clone()),
    );

    let synchronizer = SmtSynchronizer::new(
        Arc::new(db.feed()),
        Arc::clone(&cursors),
        Arc::clone(&leaves),
        Arc::clone(&smt),
        SynchronizerConfig::new(feed_stream_id(&server_id)),
    );
    let sync_handle = {
        let role_rx = role_rx.clone();
        let shutdown_rx = shutdown_rx.clone();
        let fatal_tx = fatal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = synchronizer.run(role_rx, shutdown_rx).await {
                tracing::error!(target: "node", error = %e, "follower synchronizer failed");
                let _ = fatal_tx.send(format!("synchronizer: {e}")).await;
            }
        })
    };

    let aggregator: Arc<dyn AggregatorApi> = Arc::new(Aggregator::new(
        Arc::clone(&round),
        Arc::clone(&records),
        Arc::clone(&blocks),
        role_rx.clone(),
        server_id.clone(),
    ));
    let gateway_handle = {
        let gateway_config = GatewayConfig {
            port: config.port,
            concurrency_limit: config.concurrency_limit,
            receipt_signer: signing_key.map(ReceiptSigner::new),
            ..GatewayConfig::default()
        };
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = arx_gateway::run_server(gateway_config, aggregator, shutdown_rx).await {
                tracing::error!(target: "node", error = %e, "gateway stopped");
            }
        })
    };

    // Park until an exit cause arrives.
    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "node", "shutdown signal received");
            None
        }
        reason = fatal_rx.recv() => reason,
    };

    // Graceful shutdown: stop scheduling rounds, give the in-flight round
    // a bounded window, then let the feed consumer, the gateway, and the
    // election task (lease release included) drain.
    let _ = shutdown_tx.send(true);
    let round_wait = Duration::from_millis(config.block_creation_wait_time_ms);
    if tokio::time::timeout(round_wait, producer_handle).await.is_err() {
        tracing::warn!(
            target: "node",
            wait_ms = config.block_creation_wait_time_ms,
            "in-flight round exceeded the shutdown window, abandoning it"
        );
    }
    let drain = Duration::from_secs(5);
    let _ = tokio::time::timeout(drain, sync_handle).await;
    let _ = tokio::time::timeout(drain, gateway_handle).await;
    if let Some(handle) = election_handle {
        let _ = tokio::time::timeout(drain, handle).await;
    }

    match fatal {
        Some(reason) => Err(anyhow!(
            "fatal: {reason}; exiting so the orchestrator restarts with a full SMT reload"
        )),
        None => {
            tracing::info!(target: "node", "shutdown complete");
            Ok(())
        }
    }
}

//! Superblock Agent - off-chain half of a coin chain <-> ledger chain bridge
//!
//! The agent summarizes the coin chain into superblocks and relays them, along
//! with headers and lock transactions, to the ledger chain's bridge contracts.
//! As an operator it also pays out unlock requests on the coin chain.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, error, info, warn};

mod api;
mod checkpoint;
mod coin;
mod config;
mod error;
mod events;
mod ledger;
mod metrics;
mod processor;
mod relay;
mod scheduler;
mod superblock;

use checkpoint::CheckpointStore;
use coin::{Broadcaster, CoinRpcNode, CoinTransactionBuilder, OperatorKey, PeerGroupBroadcaster};
use config::{LogFormat, Settings};
use error::AgentError;
use ledger::{BridgeClient, BridgeRelay, ContractAddresses, FailoverClient, LedgerAccounts};
use metrics::MetricsServer;
use processor::UnlockProcessor;
use relay::{LockScan, RelayTask};
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(settings.agent.log_format);

    info!("Starting Superblock Agent v{}", env!("CARGO_PKG_VERSION"));
    let started = Instant::now();

    // Ledger chain access
    let ledger = FailoverClient::new(&settings.ledger.rpc_urls).map_err(fatal)?;
    info!("Ledger provider with {} endpoints", ledger.endpoint_count());
    let provider = Arc::new(ledger.into_provider());

    let addresses = ContractAddresses::resolve(&settings.ledger).map_err(fatal)?;
    addresses
        .check_liveness(provider.as_ref())
        .await
        .map_err(fatal)?;
    let accounts = LedgerAccounts::from_config(&settings.ledger.accounts).map_err(fatal)?;

    let client = Arc::new(BridgeClient::new(
        provider,
        addresses,
        accounts,
        &settings.ledger,
        Duration::from_secs(settings.relay.receipt_timeout_secs),
    ));
    info!("Bridge contracts: {:?}", client.addresses());
    debug!("Ledger accounts: {:?}", client.accounts());

    // Coin chain access
    let coin = &settings.coin;
    let mut nodes = Vec::with_capacity(coin.rpc_urls.len());
    for url in &coin.rpc_urls {
        let node = CoinRpcNode::new(url, coin.rpc_user.as_deref(), coin.rpc_password.as_deref())
            .map_err(fatal)?;
        nodes.push(Arc::new(node));
    }
    let node = nodes[0].clone();
    let broadcaster: Arc<dyn Broadcaster> = if nodes.len() > 1 {
        let peers = nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn Broadcaster>)
            .collect();
        let group = PeerGroupBroadcaster::new(peers);
        info!("Broadcasting to {} coin nodes", group.len());
        Arc::new(group)
    } else {
        node.clone()
    };
    info!("Reading coin chain from {}", node.url());

    // Superblocks are built once, before any periodic work
    let chain = match superblock::build_chain(node.as_ref(), coin.superblock_start_height).await {
        Ok(chain) => Arc::new(chain),
        Err(e) if e.is_data_integrity() => {
            error!("Coin chain failed integrity checks: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("Failed to build superblocks: {}", e);
            return Err(e.into());
        }
    };

    let operator_key = if settings.agent.operator_enabled || settings.relay.lock_txs_enabled {
        Some(OperatorKey::from_env(&settings.operator.private_key_env).map_err(fatal)?)
    } else {
        None
    };

    let scheduler = Arc::new(Scheduler::new(Duration::from_secs(
        settings.agent.poll_interval_secs,
    )));

    // Operator role
    let mut checkpoint_rx = None;
    if let (true, Some(key)) = (settings.agent.operator_enabled, operator_key.clone()) {
        info!("Operator {} enabled", hex::encode(key.pubkey_hash_bytes()));
        let builder =
            CoinTransactionBuilder::new(key, coin.network, settings.operator.signing_mode);
        let processor = UnlockProcessor::new(
            client.clone(),
            broadcaster.clone(),
            builder,
            CheckpointStore::new(settings.checkpoint_path()),
            settings.ledger.initial_checkpoint,
            settings.ledger.min_confirmations,
        )
        .await
        .map_err(fatal)?;
        checkpoint_rx = Some(processor.subscribe());
        scheduler.register(Box::new(processor)).await;
    }

    // Relay role
    let relay_config = settings.relay.clone();
    if relay_config.headers_enabled
        || relay_config.superblocks_enabled
        || relay_config.lock_txs_enabled
    {
        let mut task = RelayTask::new(
            client.clone(),
            node.clone(),
            chain.clone(),
            relay_config.clone(),
            settings.ledger.initial_checkpoint,
        )
        .with_event_confirmations(settings.ledger.min_confirmations);
        if let (true, Some(key)) = (relay_config.lock_txs_enabled, operator_key.as_ref()) {
            task = task.with_lock_scan(LockScan {
                script: key.script_pubkey(),
                next_height: coin.lock_scan_start_height,
                confirmations: coin.required_confirmations,
            });
        }
        scheduler.register(Box::new(task)).await;
    } else {
        warn!("Every relay feature is disabled");
    }

    // Start API server
    let api_handle = if settings.api.enabled {
        let state = api::AppState {
            scheduler: scheduler.status(),
            chain: chain.clone(),
            checkpoint: checkpoint_rx,
            relay: Some(client.clone() as Arc<dyn BridgeRelay>),
            started,
        };
        let config = settings.api.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start scheduler
    let scheduler_handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    info!("Superblock Agent is running");
    if settings.api.enabled {
        info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    }
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // In-flight calls are not awaited
    scheduler.stop().await;
    scheduler_handle.abort();
    for handle in [api_handle, metrics_handle].into_iter().flatten() {
        handle.abort();
    }

    info!("Superblock Agent stopped");
    Ok(())
}

/// Log a startup failure before it ends the process
fn fatal(e: AgentError) -> anyhow::Error {
    if e.is_startup_fatal() {
        error!("Fatal startup error: {}", e);
    } else {
        error!("Startup failed: {}", e);
    }
    e.into()
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,superblock_agent=debug,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! Reputation indexer: standalone binary running one scan loop per chain.

use futures_util::future::join_all;
use reputation_backend::config::{load_chains, Config};
use reputation_backend::db::Database;
use reputation_backend::evm::{EvmRpc, EvmScanner};
use reputation_backend::hooks::{CallbackForwarder, HookBroadcaster};
use reputation_backend::sati::{SatiScanner, SolanaRpc};
use reputation_backend::worker::{run_loop, EvmWorker, SatiWorker};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    let chains = match load_chains(Path::new(&config.chains_config)) {
        Ok(chains) => chains,
        Err(e) => {
            log::error!("Invalid chain configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Opening database at: {}", config.database_url);
    let database = Arc::new(Database::new(&config.database_url).expect("Failed to open database"));
    let broadcaster = Arc::new(HookBroadcaster::new());
    let shutdown = CancellationToken::new();
    let poll_interval = Duration::from_secs(config.poll_interval_secs);

    let mut handles = Vec::new();

    if let Some(ref url) = config.hook_callback_url {
        let forwarder = CallbackForwarder::new(url);
        handles.push(tokio::spawn(forwarder.run(broadcaster.clone(), shutdown.clone())));
    }

    for chain in chains.evm {
        let label = format!("evm:{}", chain.chain_key());
        let rpc = match EvmRpc::new(&chain.rpc_url, &label) {
            Ok(rpc) => rpc,
            Err(e) => {
                log::error!("[{}] Failed to create RPC client: {}", label, e);
                std::process::exit(1);
            }
        };
        let worker = EvmWorker::new(database.clone(), broadcaster.clone(), EvmScanner::new(rpc, chain));
        handles.push(tokio::spawn(run_loop(worker, poll_interval, shutdown.clone())));
    }

    for chain in chains.sati {
        let label = format!("sati:{}", chain.chain_id);
        let rpc = match SolanaRpc::new(&chain.rpc_url, &label) {
            Ok(rpc) => rpc,
            Err(e) => {
                log::error!("[{}] Failed to create RPC client: {}", label, e);
                std::process::exit(1);
            }
        };
        let worker = SatiWorker::new(database.clone(), broadcaster.clone(), SatiScanner::new(rpc, chain));
        handles.push(tokio::spawn(run_loop(worker, poll_interval, shutdown.clone())));
    }

    log::info!("Indexer started with {} tasks (poll interval: {}s)", handles.len(), config.poll_interval_secs);

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Received shutdown signal, finishing in-flight work"),
        Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
    }
    shutdown.cancel();

    for result in join_all(handles).await {
        if let Err(e) = result {
            log::error!("Task panicked: {}", e);
        }
    }

    match database.status() {
        Ok(status) => log::info!(
            "Shutdown complete: {} agents, {} identities, {} wallet links",
            status.agents,
            status.identities,
            status.wallet_links
        ),
        Err(e) => log::warn!("Failed to read final status: {}", e),
    }
}

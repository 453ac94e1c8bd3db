//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use drip_common::utils::logging::init_logging;
use drip_crypto::SigningAccount;
use drip_faucet::api::{router, AppState};
use drip_faucet::ledger::Ledger;
use drip_faucet::rpc::{ChainClient, JsonRpcClient};
use drip_faucet::transfer::{FeePolicy, TransferBuilder};
use drip_faucet::{FaucetConfig, FaucetService};
use drip_storage::SledDB;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (toml, yaml or json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.host`
    #[arg(long)]
    host: Option<String>,

    /// JSON-RPC endpoint, overrides `ethereum.api_host`
    #[arg(long)]
    api_host: Option<String>,

    /// Ledger directory, overrides `db.path`
    #[arg(long)]
    db_path: Option<String>,

    /// Build tag reported by /liveness
    #[arg(long, env = "FAUCET_BUILD", default_value = "develop")]
    build: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FaucetConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(api_host) = args.api_host {
        config.ethereum.api_host = api_host;
    }
    if let Some(path) = args.db_path {
        config.db.path = path;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;
    config.validate()?;

    info!(version = env!("CARGO_PKG_VERSION"), build = %args.build, "starting service");
    info!(config = ?config, "startup");

    // Ledger
    info!(path = %config.db.path, "initializing database support");
    let store = Arc::new(SledDB::new(&config.db.path)?);
    let ledger = Ledger::new(store.clone());

    // Chain client and signing account
    let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcClient::new(config.ethereum.api_host.clone())?);
    let account = Arc::new(
        SigningAccount::from_private_key_hex(config.ethereum.private_key.trim())
            .context("failed to initialize account")?,
    );

    let chain_id = match config.ethereum.chain_id {
        Some(chain_id) => chain_id,
        None => chain.chain_id().await.context("failed to fetch chain id")?,
    };
    info!(address = %account.address(), chain_id, "faucet account loaded");

    let fee_policy = FeePolicy {
        fee_cap_premium: u128::from(config.ethereum.fee_cap_premium_wei),
        gas_margin_percent: config.ethereum.gas_margin_percent,
        legacy_gas_limit: config.ethereum.legacy_gas_limit,
    };
    let transfers = TransferBuilder::new(chain.clone(), account, chain_id, fee_policy);
    let faucet = Arc::new(FaucetService::from_config(&config, ledger, transfers));

    let policy = faucet.policy();
    info!(
        total_limit = policy.total_cap,
        address_limit = policy.address_cap,
        amount = policy.disbursement,
        "transfer limits"
    );

    let state = AppState {
        faucet,
        chain,
        build: args.build,
    };
    let app = router(state, &config.server.allowed_origins);

    let addr: SocketAddr = config.server.host.parse().context("invalid server.host")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown: flushing ledger");
    match tokio::time::timeout(config.shutdown_timeout(), store.flush()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "ledger flush failed"),
        Err(_) => warn!("ledger flush did not finish before the shutdown timeout"),
    }

    info!("shutdown complete");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

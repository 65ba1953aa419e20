mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chainclaw::chain::ChainRegistry;
use chainclaw::chain::gas::GasOptimizer;
use chainclaw::config::AgentConfig;
use chainclaw::delivery::{DeliveryQueue, NotificationSender, TracingSender};
use chainclaw::engines::dca::DcaEngine;
use chainclaw::engines::limit_orders::LimitOrderEngine;
use chainclaw::engines::signals::SignalsEngine;
use chainclaw::engines::whales::WhaleEngine;
use chainclaw::executor::{Executor, MevConfig};
use chainclaw::guardrails::Guardrails;
use chainclaw::prices::HttpPriceFeed;
use chainclaw::quotes::HttpQuoteClient;
use chainclaw::risk::RiskEngine;
use chainclaw::risk::oracle::HttpRiskOracle;
use chainclaw::signer::{LocalSigner, Signer};
use chainclaw::sim::{HttpSimulationBackend, SimulationBackend, Simulator};
use chainclaw::store::Store;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let mut config = AgentConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    match cli.command {
        cli::Command::Init { data_dir } => {
            apply_data_dir(&mut config, data_dir);
            let store = Store::open(&config.db_path())?;
            drop(store);
            println!("initialized store at {}", config.db_path().display());
            Ok(())
        }
        cli::Command::Status { data_dir } => {
            apply_data_dir(&mut config, data_dir);
            let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
            rt.block_on(async {
                let store = Store::open(&config.db_path())?;
                for (table, count) in store.table_counts().await? {
                    println!("{table:24} {count}");
                }
                Ok(())
            })
        }
        cli::Command::Run { data_dir } => {
            apply_data_dir(&mut config, data_dir);
            let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
            rt.block_on(run_daemon(config))
        }
    }
}

fn apply_data_dir(config: &mut AgentConfig, data_dir: Option<PathBuf>) {
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
}

async fn run_daemon(config: AgentConfig) -> Result<()> {
    // Pick the process-wide rustls crypto provider before any TLS client.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    info!(data_dir = %config.data_dir.display(), "chainclaw starting");

    // ── Store and chain access ─────────────────────────────────────
    let store = Store::open(&config.db_path())?;
    let chains = Arc::new(ChainRegistry::new(&config.rpc_overrides)?);
    info!(chains = ?chains.chain_ids(), "chain clients ready");

    // ── External service clients ───────────────────────────────────
    let oracle = Arc::new(HttpRiskOracle::new(
        config.risk_api_url.as_deref(),
        config.risk_api_key.as_deref(),
    )?);
    let sim_backend: Option<Arc<dyn SimulationBackend>> = match &config.sim_api_url {
        Some(url) => Some(Arc::new(HttpSimulationBackend::new(url, config.sim_api_key.as_deref())?)),
        None => {
            warn!("no simulation service configured; dry runs degrade to local estimates");
            None
        }
    };
    let quotes = Arc::new(HttpQuoteClient::new(
        config.quote_api_url.as_deref(),
        config.quote_api_key.as_deref(),
    )?);
    let prices = Arc::new(HttpPriceFeed::new(config.price_api_url.as_deref())?);

    // ── Pipeline ───────────────────────────────────────────────────
    let risk = Arc::new(RiskEngine::new(store.clone(), oracle, config.risk_cache_ttl));
    let simulator = Arc::new(Simulator::new(sim_backend));
    let guardrails = Arc::new(Guardrails::new(
        store.clone(),
        config.default_limits.clone(),
        config.confirm_threshold,
    ));
    let executor = Arc::new(Executor::new(
        store.clone(),
        chains.clone(),
        risk.clone(),
        simulator,
        guardrails,
        prices.clone(),
        Some(GasOptimizer),
        MevConfig { enabled: config.mev_protect, relay_url: config.mev_relay_url.clone() },
    ));

    // ── Signer ─────────────────────────────────────────────────────
    let private_key = config.require_private_key()?;
    let default_rpc = chains
        .rpc_url(1)
        .map(String::from)
        .unwrap_or_else(|| "https://eth.llamarpc.com".into());
    let signer: Arc<dyn Signer> = Arc::new(
        LocalSigner::new(private_key, default_rpc)
            .map_err(|e| anyhow::anyhow!("signer setup: {e}"))?,
    );
    info!(address = %signer.address(), "signer ready");

    // ── Delivery queue: recover before anything new is produced ────
    let notifier: Arc<dyn NotificationSender> = Arc::new(TracingSender);
    let delivery = DeliveryQueue::new(store.clone(), config.delivery_max_attempts);
    let recovered = delivery.recover_pending(notifier.as_ref()).await?;
    if recovered > 0 {
        info!(recovered, "pending notifications replayed");
    }

    // ── Background engines ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut engines: Vec<(&str, JoinHandle<()>)> = Vec::new();

    let dca = Arc::new(DcaEngine::new(
        store.clone(),
        executor.clone(),
        quotes.clone(),
        prices.clone(),
        signer.clone(),
        config.dca_poll_interval,
        config.default_limits.slippage_bps,
    ));
    engines.push(("dca", dca.spawn(shutdown_rx.clone())));

    let limit_orders = Arc::new(LimitOrderEngine::new(
        store.clone(),
        executor.clone(),
        quotes.clone(),
        prices.clone(),
        signer.clone(),
        config.limit_poll_interval,
        config.default_limits.slippage_bps,
    ));
    engines.push(("limit-orders", limit_orders.spawn(shutdown_rx.clone())));

    let whales = Arc::new(WhaleEngine::new(
        store.clone(),
        chains.clone(),
        executor.clone(),
        quotes.clone(),
        prices.clone(),
        risk.clone(),
        delivery.clone(),
        notifier.clone(),
        signer.clone(),
        config.whale_poll_interval,
        config.alert_channel.clone(),
        config.default_limits.slippage_bps,
    ));
    engines.push(("whales", whales.spawn(shutdown_rx.clone())));

    let signals = Arc::new(SignalsEngine::new(
        store.clone(),
        chains.clone(),
        delivery.clone(),
        notifier.clone(),
        config.signal_poll_interval,
    ));
    engines.push(("signals", signals.spawn(shutdown_rx.clone())));

    info!("all engines running; ctrl-c to stop");

    // ── Shutdown sequence ──────────────────────────────────────────
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");

    // Stop accepting new poll work, then wait for in-flight iterations
    // under a hard deadline.
    let _ = shutdown_tx.send(true);
    let drain = async {
        for (name, handle) in engines {
            if let Err(err) = handle.await {
                error!(engine = name, %err, "engine task panicked");
            }
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "shutdown deadline reached, forcing exit"
        );
    }

    // Chain clients and the store close with their last references.
    drop(chains);
    drop(store);
    info!("chainclaw stopped");
    Ok(())
}

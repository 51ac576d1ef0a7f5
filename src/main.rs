use alloy_network::AnyNetwork;
use alloy_provider::ProviderBuilder;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use sonicx_scanner::ledger::{LedgerReader, RpcLedger};
use sonicx_scanner::metrics::Metrics;
use sonicx_scanner::scanner::{Scanner, parse_range_args, resolve_range};
use sonicx_scanner::storage::{ProgressStore, TransactionStore, sqlite::SqliteStore};
use sonicx_scanner::utils::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Validate the command line before touching anything
    let args: Vec<String> = std::env::args().skip(1).collect();
    let explicit_range = match parse_range_args(&args) {
        Ok(range) => range,
        Err(e) => {
            error!("{}", e);
            error!("Usage: sonicx-scanner [<start_block> <end_block>]");
            return Err(anyhow!(e));
        }
    };

    // Load config
    let config = match load_config("config.yml") {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(e);
        }
    };
    let settings = config.scanner_settings()?;
    let rpc_url = config.rpc_url()?;

    match settings.target_address {
        Some(target) => info!("Target contract: {:#x}", target),
        None => info!("No target contract configured, every transaction is relevant"),
    }

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
        Some(metrics)
    } else {
        info!("Metrics are disabled");
        None
    };

    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .context("failed to open store")?,
    );

    // Ctrl+C lets the in-flight block finish before the store is closed
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received Ctrl+C signal, finishing current block before shutdown...");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("RPC URL: {}", rpc_url);
    let provider = ProviderBuilder::new()
        .disable_recommended_fillers()
        .network::<AnyNetwork>()
        .connect_http(rpc_url);
    let ledger = Arc::new(RpcLedger::new(
        provider,
        settings.max_concurrency,
        metrics.clone(),
    ));

    let scanner = Scanner::new(ledger.clone(), store.clone(), settings)
        .with_metrics(metrics)
        .with_shutdown(shutdown_rx);

    let result = run(&scanner, ledger.as_ref(), store.as_ref(), explicit_range).await;
    store.close().await;
    result
}

async fn run<L: LedgerReader>(
    scanner: &Scanner<L, SqliteStore>,
    ledger: &L,
    store: &SqliteStore,
    explicit_range: Option<(u64, u64)>,
) -> Result<()> {
    match store.last_processed_height().await? {
        Some(height) => info!(
            "Last processed block: {} ({} blocks processed, {} transactions stored)",
            height,
            store.processed_count().await?,
            store.transaction_count().await?
        ),
        None => info!("No blocks processed yet"),
    }

    let head = match explicit_range {
        Some((_, end)) => end,
        None => ledger.latest_height().await?,
    };
    let (start, end) = resolve_range(explicit_range, head, scanner.settings())?;

    println!();
    info!("========================= STARTING SCANNER =========================");

    let summary = scanner.scan_range(start, end).await?;

    if summary.interrupted {
        info!("Scan interrupted, re-run the same range to resume");
    }
    if !summary.failed_heights.is_empty() {
        error!(
            "{} block(s) could not be fetched and were left unprocessed: {:?}",
            summary.failed_heights.len(),
            summary.failed_heights
        );
        return Err(anyhow!(
            "{} block(s) failed, re-run the range to retry them",
            summary.failed_heights.len()
        ));
    }

    Ok(())
}

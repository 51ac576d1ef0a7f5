//! Read-only connectivity check against the configured RPC endpoint.

use alloy_network::AnyNetwork;
use alloy_provider::ProviderBuilder;
use anyhow::{Result, anyhow};
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

use sonicx_scanner::ledger::{LedgerReader, RpcLedger};
use sonicx_scanner::utils::{hex_address, load_config};

const SAMPLE_TRANSACTIONS: usize = 2;
const RECENT_BLOCKS: u64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("============================ DIAGNOSTICS ===========================");

    let config = load_config("config.yml")?;
    let settings = config.scanner_settings()?;
    let rpc_url = config.rpc_url()?;
    info!("RPC URL: {}", rpc_url);

    let provider = ProviderBuilder::new()
        .disable_recommended_fillers()
        .network::<AnyNetwork>()
        .connect_http(rpc_url);
    let ledger = RpcLedger::new(provider, settings.max_concurrency, None);

    let chain_id = ledger.chain_id().await?;
    let head = ledger.latest_height().await?;
    info!("Chain ID: {}, head block: {}", chain_id, head);

    let block = ledger
        .get_block(head, true)
        .await?
        .ok_or_else(|| anyhow!("head block {head} not returned by the node"))?;
    info!(
        "Block {}: hash {:#x}, timestamp {}, {} transactions",
        block.number,
        block.hash,
        block.timestamp,
        block.transactions.len()
    );

    for tx in block.transactions.iter().take(SAMPLE_TRANSACTIONS) {
        let Some(hash) = tx.hash else {
            continue;
        };
        info!(
            "  tx {:#x}: from {}, to {}, value {}",
            hash,
            tx.from.map_or_else(|| "unknown".to_string(), hex_address),
            tx.to.map_or_else(|| "contract creation".to_string(), hex_address),
            tx.value.unwrap_or_default()
        );
        match ledger.get_receipt(hash).await {
            Ok(Some(receipt)) => info!(
                "    receipt: status {}, gas used {}, {} logs",
                receipt.status.as_str(),
                receipt.gas_used,
                receipt.logs.len()
            ),
            Ok(None) => warn!("    receipt not found"),
            Err(e) => error!("    receipt lookup failed: {}", e),
        }
    }

    match settings.target_address {
        Some(target) => {
            let size = ledger.code_size(target).await?;
            if size > 0 {
                info!("Target {} has {} bytes of code", hex_address(target), size);
            } else {
                warn!("Target {} has no deployed code", hex_address(target));
            }
        }
        None => info!("No target address configured"),
    }

    info!("Transactions in the last {} blocks:", RECENT_BLOCKS);
    for height in (head.saturating_sub(RECENT_BLOCKS - 1)..=head).rev() {
        match ledger.get_block(height, false).await {
            Ok(Some(block)) => info!("  block {}: {} transactions", height, block.transactions.len()),
            Ok(None) => warn!("  block {}: not found", height),
            Err(e) => error!("  block {}: {}", height, e),
        }
    }

    Ok(())
}

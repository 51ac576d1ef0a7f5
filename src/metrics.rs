use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub struct Metrics {
    registry: Arc<Registry>,

    // Scan metrics
    pub blocks_scanned: IntCounter,
    pub blocks_skipped: IntCounter,
    pub blocks_failed: IntCounter,
    pub latest_scanned_block: IntGauge,
    pub latest_block_processing_time: Gauge,
    pub transactions_matched: IntCounter,
    pub transactions_saved: IntCounter,
    pub tokens_detected: IntCounter,

    // Chain metrics
    pub chain_tip_block: IntGauge,

    // RPC metrics
    pub rpc_requests: IntCounterVec,
    pub rpc_errors: IntCounterVec,
    pub rpc_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let blocks_scanned = IntCounter::new(
            "scanner_blocks_scanned",
            "Total number of heights scanned and marked processed",
        )?;
        let blocks_skipped = IntCounter::new(
            "scanner_blocks_skipped",
            "Heights skipped because they were already processed",
        )?;
        let blocks_failed = IntCounter::new(
            "scanner_blocks_failed",
            "Heights left unprocessed because the block could not be fetched",
        )?;
        let latest_scanned_block = IntGauge::new(
            "scanner_latest_scanned_block_number",
            "Latest block number marked processed",
        )?;
        let latest_block_processing_time = Gauge::new(
            "scanner_latest_block_processing",
            "Time spent processing the latest block",
        )?;
        let transactions_matched = IntCounter::new(
            "scanner_transactions_matched",
            "Transactions that interacted with the target contract",
        )?;
        let transactions_saved = IntCounter::new(
            "scanner_transactions_saved",
            "Transactions newly written to the store",
        )?;
        let tokens_detected = IntCounter::new(
            "scanner_tokens_detected",
            "Affiliated token contracts detected",
        )?;
        let chain_tip_block =
            IntGauge::new("scanner_chain_tip_block_number", "Latest block number on chain")?;

        let rpc_requests = IntCounterVec::new(
            Opts::new("scanner_rpc_requests", "Number of RPC requests made"),
            &["method"],
        )?;
        let rpc_errors = IntCounterVec::new(
            Opts::new("scanner_rpc_errors", "Number of RPC errors encountered"),
            &["method"],
        )?;
        let rpc_latency = HistogramVec::new(
            HistogramOpts::new("scanner_rpc_latency", "RPC request latency in seconds").buckets(
                vec![0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0],
            ),
            &["method"],
        )?;

        registry.register(Box::new(blocks_scanned.clone()))?;
        registry.register(Box::new(blocks_skipped.clone()))?;
        registry.register(Box::new(blocks_failed.clone()))?;
        registry.register(Box::new(latest_scanned_block.clone()))?;
        registry.register(Box::new(latest_block_processing_time.clone()))?;
        registry.register(Box::new(transactions_matched.clone()))?;
        registry.register(Box::new(transactions_saved.clone()))?;
        registry.register(Box::new(tokens_detected.clone()))?;
        registry.register(Box::new(chain_tip_block.clone()))?;
        registry.register(Box::new(rpc_requests.clone()))?;
        registry.register(Box::new(rpc_errors.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            blocks_scanned,
            blocks_skipped,
            blocks_failed,
            latest_scanned_block,
            latest_block_processing_time,
            transactions_matched,
            transactions_saved,
            tokens_detected,
            chain_tip_block,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    /// Records one RPC call: request count, latency, and an error if `failed`.
    pub fn record_rpc(&self, method: &str, started: Instant, failed: bool) {
        self.rpc_requests.with_label_values(&[method]).inc();
        self.rpc_latency
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64());
        if failed {
            self.rpc_errors.with_label_values(&[method]).inc();
        }
    }

    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid metrics address {addr}:{port}"))?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {addr}"))?;

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

fn render_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

async fn metrics_handler(registry: Arc<Registry>) -> Result<String, (StatusCode, String)> {
    render_registry(&registry).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.blocks_scanned.inc();
        metrics.record_rpc("get_block", Instant::now(), true);

        let text = metrics.render().unwrap();
        assert!(text.contains("scanner_blocks_scanned 1"));
        assert!(text.contains("scanner_rpc_errors{method=\"get_block\"} 1"));
    }
}

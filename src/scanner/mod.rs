pub mod filter;
pub mod tokens;
pub mod transformations;

use alloy_primitives::TxHash;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::ledger::LedgerReader;
use crate::metrics::Metrics;
use crate::models::chain::{Receipt, Transaction};
use crate::models::common::ScannerSettings;
use crate::models::errors::ScanError;
use crate::scanner::filter::{Interaction, filter_interactions};
use crate::scanner::tokens::{AffiliationRule, DetectedToken, MarkerAffiliation, TokenClassifier};
use crate::scanner::transformations::{BlockContext, RecordTransformer};
use crate::storage::Store;

/// What happened at one height.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeightReport {
    /// Already processed by an earlier run; nothing was fetched or written.
    pub skipped: bool,
    pub transactions: usize,
    pub matched: usize,
    pub saved: usize,
    pub tokens: usize,
}

/// Outcome of [`Scanner::scan_range`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub start: u64,
    pub end: u64,
    pub scanned: u64,
    pub skipped: u64,
    /// Heights whose block could not be fetched. They stay unprocessed, so re-running the
    /// range retries them.
    pub failed_heights: Vec<u64>,
    pub matched: usize,
    pub saved: usize,
    pub tokens: usize,
    /// Stopped early on a shutdown signal.
    pub interrupted: bool,
}

impl ScanSummary {
    pub fn is_complete(&self) -> bool {
        self.failed_heights.is_empty() && !self.interrupted
    }
}

/// Drives heights through fetch, classification, filtering, persistence and marking.
///
/// Heights run strictly one after another. Work inside a height fans out up to
/// `max_concurrency`, and marking waits for all of it.
pub struct Scanner<L, S> {
    ledger: Arc<L>,
    store: Arc<S>,
    settings: ScannerSettings,
    classifier: TokenClassifier,
    metrics: Option<Arc<Metrics>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<L, S> Scanner<L, S>
where
    L: LedgerReader,
    S: Store,
{
    pub fn new(ledger: Arc<L>, store: Arc<S>, settings: ScannerSettings) -> Self {
        let rule = MarkerAffiliation::new(&settings.token_markers, settings.known_deployer);
        Self {
            ledger,
            store,
            classifier: TokenClassifier::new(Arc::new(rule)),
            settings,
            metrics: None,
            shutdown: None,
        }
    }

    pub fn with_affiliation_rule(mut self, rule: Arc<dyn AffiliationRule>) -> Self {
        self.classifier = TokenClassifier::new(rule);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The signal is checked between heights, never inside one.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Scans `start..=end` in ascending order.
    ///
    /// An inverted range is rejected before anything is read or written. A height that fails
    /// is reported in the summary and the scan moves on.
    pub async fn scan_range(&self, start: u64, end: u64) -> Result<ScanSummary, ScanError> {
        if end < start {
            return Err(ScanError::configuration(format!(
                "end height {end} is below start height {start}"
            )));
        }

        let mut summary = ScanSummary {
            start,
            end,
            ..Default::default()
        };

        info!("Scanning blocks {} to {}", start, end);

        for height in start..=end {
            if self.shutdown_requested() {
                info!("Shutdown requested, stopping before block {}", height);
                summary.interrupted = true;
                break;
            }

            match self.scan_height(height).await {
                Ok(report) if report.skipped => summary.skipped += 1,
                Ok(report) => {
                    summary.scanned += 1;
                    summary.matched += report.matched;
                    summary.saved += report.saved;
                    summary.tokens += report.tokens;
                }
                Err(e) => {
                    error!("Block {} failed and was not marked processed: {}", height, e);
                    if let Some(metrics) = &self.metrics {
                        metrics.blocks_failed.inc();
                    }
                    summary.failed_heights.push(height);
                }
            }
        }

        info!(
            "Scan of blocks {}-{} finished: {} scanned, {} skipped, {} failed, {} matched, {} saved, {} tokens",
            summary.start,
            summary.end,
            summary.scanned,
            summary.skipped,
            summary.failed_heights.len(),
            summary.matched,
            summary.saved,
            summary.tokens
        );

        Ok(summary)
    }

    /// Scans a single height and returns how many transactions matched the target.
    /// An already processed height returns 0 without touching the ledger.
    pub async fn scan_one(&self, height: u64) -> Result<usize, ScanError> {
        self.scan_height(height).await.map(|report| report.matched)
    }

    pub async fn scan_height(&self, height: u64) -> Result<HeightReport, ScanError> {
        if self.store.is_processed(height).await? {
            debug!("Block {} already processed, skipping", height);
            if let Some(metrics) = &self.metrics {
                metrics.blocks_skipped.inc();
            }
            return Ok(HeightReport {
                skipped: true,
                ..Default::default()
            });
        }

        let started = Instant::now();

        // A fetch error leaves the height unmarked; an absent block is final
        let block = self.ledger.get_block(height, true).await?;
        let (context, transactions) = match block {
            Some(block) => (
                BlockContext {
                    number: block.number,
                    timestamp: block.timestamp,
                },
                block.transactions,
            ),
            None => {
                warn!("Block {} not available, marking it processed with no transactions", height);
                (
                    BlockContext {
                        number: height,
                        timestamp: 0,
                    },
                    Vec::new(),
                )
            }
        };

        let mut report = HeightReport {
            transactions: transactions.len(),
            ..Default::default()
        };

        // Token creations first, so a creation that also touches the target is stored once
        let mut stored_as_token = HashSet::new();
        let mut receipts = HashMap::new();
        if self.settings.detect_tokens {
            let detected_tokens = self.detect_tokens(&transactions, &mut receipts).await;
            for (tx, detected) in detected_tokens {
                let receipt = tx.hash.and_then(|hash| receipts.get(&hash));
                let Some((token_saved, transaction_saved)) =
                    self.persist_token(tx, receipt, detected, context).await
                else {
                    continue;
                };
                report.tokens += usize::from(token_saved);
                report.saved += usize::from(transaction_saved);
                stored_as_token.extend(tx.hash);
            }
        }

        let interactions = filter_interactions(
            self.ledger.as_ref(),
            &transactions,
            self.settings.target_address,
            self.settings.max_concurrency,
            &receipts,
        )
        .await;
        report.matched = interactions.len();

        let pending: Vec<Interaction<'_>> = interactions
            .into_iter()
            .filter(|i| !i.transaction.hash.is_some_and(|h| stored_as_token.contains(&h)))
            .collect();

        for chunk in pending.chunks(self.settings.max_concurrency.max(1)) {
            let results = join_all(chunk.iter().map(|i| self.persist_interaction(i, context))).await;
            report.saved += results.into_iter().filter(|saved| *saved).count();
        }

        // Barrier: every save for this height has been attempted
        self.store.mark_processed(height).await?;

        info!(
            "Block {}: {} transactions, {} matched, {} saved",
            height, report.transactions, report.matched, report.saved
        );

        if let Some(metrics) = &self.metrics {
            metrics.blocks_scanned.inc();
            metrics.latest_scanned_block.set(height as i64);
            metrics
                .latest_block_processing_time
                .set(started.elapsed().as_secs_f64());
            metrics.transactions_matched.inc_by(report.matched as u64);
            metrics.transactions_saved.inc_by(report.saved as u64);
            metrics.tokens_detected.inc_by(report.tokens as u64);
        }

        Ok(report)
    }

    /// Runs the classifier over every transaction of the block; failures only drop the
    /// transaction they belong to. Every receipt fetched along the way lands in `receipts`.
    async fn detect_tokens<'a>(
        &self,
        transactions: &'a [Transaction],
        receipts: &mut HashMap<TxHash, Receipt>,
    ) -> Vec<(&'a Transaction, DetectedToken)> {
        let candidates: Vec<&Transaction> = transactions
            .iter()
            .filter(|tx| tokens::is_token_candidate(tx))
            .collect();

        let mut detected = Vec::new();
        for chunk in candidates.chunks(self.settings.max_concurrency.max(1)) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|tx| self.classifier.classify(self.ledger.as_ref(), tx)),
            )
            .await;

            for (tx, result) in chunk.iter().zip(results) {
                match result {
                    Ok(classification) => {
                        if let Some(receipt) = classification.receipt {
                            receipts.insert(receipt.transaction_hash, receipt);
                        }
                        if let Some(token) = classification.token {
                            detected.push((*tx, token));
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            }
        }
        detected
    }

    /// `None` when nothing could be written, otherwise `(token_inserted, transaction_inserted)`.
    async fn persist_token(
        &self,
        tx: &Transaction,
        receipt: Option<&Receipt>,
        detected: DetectedToken,
        context: BlockContext,
    ) -> Option<(bool, bool)> {
        let record = tx.to_token_creation_record(receipt, context, detected.contract_address)?;

        match self.store.save_token_creation(&detected.record, &record).await {
            Ok(saved) => {
                info!(
                    "Detected token {} ({}) at {} in transaction {}",
                    detected.record.name, detected.record.symbol, detected.record.address, record.hash
                );
                Some(saved)
            }
            Err(e) => {
                error!("Failed to save token {} from {}: {}", detected.record.address, record.hash, e);
                None
            }
        }
    }

    /// Receipt lookup is best-effort: without one the record is saved with status unknown.
    async fn persist_interaction(&self, interaction: &Interaction<'_>, context: BlockContext) -> bool {
        let tx = interaction.transaction;
        let fetched: Option<Receipt>;
        let receipt = match (&interaction.receipt, tx.hash) {
            (Some(receipt), _) => Some(receipt),
            (None, Some(hash)) => {
                fetched = match self.ledger.get_receipt(hash).await {
                    Ok(receipt) => receipt,
                    Err(e) => {
                        warn!("Saving {:#x} without receipt: {}", hash, e);
                        None
                    }
                };
                fetched.as_ref()
            }
            (None, None) => None,
        };

        let Some(record) = tx.to_record(receipt, context) else {
            return false;
        };

        match self.store.save_transaction(&record).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("Transaction {} already stored", record.hash);
                false
            }
            Err(e) => {
                error!("Failed to save transaction {}: {}", record.hash, e);
                false
            }
        }
    }
}

/// Picks the heights to scan: the explicit pair if given, otherwise the most recent
/// `default_window` blocks up to `head`, never below `first_scannable_height`.
pub fn resolve_range(
    explicit: Option<(u64, u64)>,
    head: u64,
    settings: &ScannerSettings,
) -> Result<(u64, u64), ScanError> {
    let (start, end) = match explicit {
        Some(range) => range,
        None => {
            let start = head
                .saturating_sub(settings.default_window)
                .max(settings.first_scannable_height);
            (start, head)
        }
    };

    if end < start {
        return Err(ScanError::configuration(format!(
            "end height {end} is below start height {start}"
        )));
    }
    Ok((start, end))
}

/// Command-line bounds: none for the default range, or exactly `<start> <end>`.
pub fn parse_range_args(args: &[String]) -> Result<Option<(u64, u64)>, ScanError> {
    match args {
        [] => Ok(None),
        [start, end] => {
            let start = parse_height("start", start)?;
            let end = parse_height("end", end)?;
            if end < start {
                return Err(ScanError::configuration(format!(
                    "end height {end} is below start height {start}"
                )));
            }
            Ok(Some((start, end)))
        }
        _ => Err(ScanError::configuration(format!(
            "expected no arguments or <start> <end>, got {} argument(s)",
            args.len()
        ))),
    }
}

fn parse_height(label: &str, value: &str) -> Result<u64, ScanError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ScanError::configuration(format!("invalid {label} height '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_default_range_covers_window_ending_at_head() {
        let settings = ScannerSettings::default();
        assert_eq!(resolve_range(None, 1000, &settings).unwrap(), (980, 1000));
    }

    #[test]
    fn test_default_range_is_clamped_to_first_scannable_height() {
        let settings = ScannerSettings::default();
        assert_eq!(resolve_range(None, 5, &settings).unwrap(), (1, 5));

        let genesis = ScannerSettings {
            first_scannable_height: 0,
            ..Default::default()
        };
        assert_eq!(resolve_range(None, 5, &genesis).unwrap(), (0, 5));
    }

    #[test]
    fn test_head_below_first_scannable_height_is_rejected() {
        let settings = ScannerSettings::default();
        assert!(matches!(
            resolve_range(None, 0, &settings),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn test_explicit_range_wins_and_may_start_at_zero() {
        let settings = ScannerSettings::default();
        assert_eq!(resolve_range(Some((0, 3)), 1000, &settings).unwrap(), (0, 3));
    }

    #[test]
    fn test_parse_range_args() {
        assert_eq!(parse_range_args(&[]).unwrap(), None);
        assert_eq!(parse_range_args(&args(&["10", "20"])).unwrap(), Some((10, 20)));
        assert_eq!(parse_range_args(&args(&["7", "7"])).unwrap(), Some((7, 7)));
    }

    #[test]
    fn test_parse_range_args_rejects_bad_input() {
        for bad in [
            args(&["10"]),
            args(&["1", "2", "3"]),
            args(&["abc", "20"]),
            args(&["-1", "20"]),
            args(&["20", "10"]),
        ] {
            assert!(
                matches!(parse_range_args(&bad), Err(ScanError::Configuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}

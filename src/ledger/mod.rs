pub mod parsers;

use alloy_eips::BlockNumberOrTag;
use alloy_network::{AnyNetwork, AnyRpcBlock, primitives::BlockTransactions};
use alloy_primitives::{Address, Bytes, TxHash};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{TransactionInput, TransactionRequest};
use alloy_serde::WithOtherFields;
use alloy_transport::TransportError;
use async_trait::async_trait;
use futures::future::join_all;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::ledger::parsers::{ReceiptParser, TransactionParser, classify_error};
use crate::metrics::Metrics;
use crate::models::chain::{Block, Receipt, Transaction};
use crate::models::errors::ScanError;

/// Read access to the chain. Implementations never write durable state.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn latest_height(&self) -> Result<u64, ScanError>;

    /// `Ok(None)` when the height does not exist yet or the node has nothing for it.
    ///
    /// With `include_transactions`, every entry is a full transaction in block order. Without
    /// it, entries only carry their hash.
    async fn get_block(&self, height: u64, include_transactions: bool) -> Result<Option<Block>, ScanError>;

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, ScanError>;

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ScanError>;

    /// Read-only `eth_call` against the latest state.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ScanError>;

    async fn has_code(&self, address: Address) -> Result<bool, ScanError>;
}

/// [`LedgerReader`] over a JSON-RPC endpoint.
pub struct RpcLedger<P> {
    provider: P,
    max_concurrency: usize,
    metrics: Option<Arc<Metrics>>,
}

impl<P> RpcLedger<P>
where
    P: Provider<AnyNetwork>,
{
    pub fn new(provider: P, max_concurrency: usize, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            provider,
            max_concurrency: max_concurrency.max(1),
            metrics,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn chain_id(&self) -> Result<u64, ScanError> {
        self.observe("get_chain_id", self.provider.get_chain_id())
            .await
            .map_err(|e| classify_error("get_chain_id", "chain", e))
    }

    /// Deployed bytecode length, zero for externally owned accounts.
    pub async fn code_size(&self, address: Address) -> Result<usize, ScanError> {
        self.observe("get_code", self.provider.get_code_at(address))
            .await
            .map(|code| code.len())
            .map_err(|e| classify_error("get_code", address, e))
    }

    async fn observe<T, F>(&self, method: &'static str, request: F) -> Result<T, TransportError>
    where
        F: IntoFuture<Output = Result<T, TransportError>>,
    {
        let started = Instant::now();
        let result = request.await;
        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(method, started, result.is_err());
        }
        result
    }

    /// Resolves hashes into full transactions, `max_concurrency` at a time.
    /// Output keeps the input order; unresolvable hashes are dropped.
    async fn resolve_hashes(&self, height: u64, hashes: &[TxHash]) -> Vec<Transaction> {
        let mut resolved = Vec::with_capacity(hashes.len());

        for chunk in hashes.chunks(self.max_concurrency) {
            let results = join_all(chunk.iter().map(|hash| self.get_transaction(*hash))).await;

            for (hash, result) in chunk.iter().zip(results) {
                match result {
                    Ok(Some(tx)) => resolved.push(tx),
                    Ok(None) => warn!("Block {}: transaction {:#x} not found, dropping it", height, hash),
                    Err(e) => warn!("Block {}: failed to resolve transaction {:#x}: {}", height, hash, e),
                }
            }
        }

        resolved
    }
}

fn into_block(block: &AnyRpcBlock, transactions: Vec<Transaction>) -> Block {
    let number = block.header.inner.number;
    let timestamp = block.header.inner.timestamp;

    let transactions = transactions
        .into_iter()
        .map(|mut tx| {
            tx.block_number.get_or_insert(number);
            tx.timestamp.get_or_insert(timestamp);
            tx
        })
        .collect();

    Block {
        number,
        hash: block.header.hash,
        timestamp,
        transactions,
    }
}

fn hash_only(hash: TxHash) -> Transaction {
    Transaction {
        hash: Some(hash),
        ..Default::default()
    }
}

#[async_trait]
impl<P> LedgerReader for RpcLedger<P>
where
    P: Provider<AnyNetwork>,
{
    async fn latest_height(&self) -> Result<u64, ScanError> {
        let height = self
            .observe("get_block_number", self.provider.get_block_number())
            .await
            .map_err(|e| classify_error("get_block_number", "head", e))?;

        if let Some(metrics) = &self.metrics {
            metrics.chain_tip_block.set(height as i64);
        }
        Ok(height)
    }

    async fn get_block(&self, height: u64, include_transactions: bool) -> Result<Option<Block>, ScanError> {
        let request = self.provider.get_block_by_number(BlockNumberOrTag::Number(height));
        let request = if include_transactions {
            request.full()
        } else {
            request.hashes()
        };

        let Some(block) = self
            .observe("get_block_by_number", request)
            .await
            .map_err(|e| classify_error("get_block_by_number", height, e))?
        else {
            return Ok(None);
        };

        let transactions = match &block.transactions {
            BlockTransactions::Full(txs) => txs.iter().map(|tx| tx.parse_transaction()).collect(),
            // Some nodes answer with hashes even when full objects were requested
            BlockTransactions::Hashes(hashes) if include_transactions => {
                self.resolve_hashes(height, hashes).await
            }
            BlockTransactions::Hashes(hashes) => hashes.iter().copied().map(hash_only).collect(),
            BlockTransactions::Uncle => Vec::new(),
        };

        Ok(Some(into_block(&block, transactions)))
    }

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, ScanError> {
        let tx = self
            .observe("get_transaction_by_hash", self.provider.get_transaction_by_hash(hash))
            .await
            .map_err(|e| classify_error("get_transaction_by_hash", hash, e))?;
        Ok(tx.map(|tx| tx.parse_transaction()))
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ScanError> {
        let receipt = self
            .observe("get_transaction_receipt", self.provider.get_transaction_receipt(hash))
            .await
            .map_err(|e| classify_error("get_transaction_receipt", hash, e))?;
        Ok(receipt.map(|receipt| receipt.parse_receipt()))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ScanError> {
        let request = WithOtherFields::new(
            TransactionRequest::default()
                .to(to)
                .input(TransactionInput::new(data)),
        );
        self.observe("eth_call", self.provider.call(request))
            .await
            .map_err(|e| classify_error("eth_call", to, e))
    }

    async fn has_code(&self, address: Address) -> Result<bool, ScanError> {
        Ok(self.code_size(address).await? > 0)
    }
}

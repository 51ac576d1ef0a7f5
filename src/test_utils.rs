//! In-process doubles for the ledger and the store, used by unit and integration tests.

use alloy_primitives::{Address, Bytes, TxHash};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ledger::LedgerReader;
use crate::models::chain::{Block, Receipt, Transaction};
use crate::models::errors::ScanError;
use crate::models::records::{StoredTransaction, TokenRecord};
use crate::scanner::tokens::{IERC20Metadata, TokenMetadata};
use crate::storage::{ProgressStore, TransactionStore};

/// A ledger answering from fixed, pre-loaded data. Counts the fetches it serves.
#[derive(Debug, Default)]
pub struct ScriptedLedger {
    head: u64,
    blocks: HashMap<u64, Block>,
    failing_blocks: HashSet<u64>,
    receipts: HashMap<TxHash, Receipt>,
    failing_receipts: HashSet<TxHash>,
    tokens: HashMap<Address, TokenMetadata>,
    contracts: HashSet<Address>,
    block_fetches: AtomicUsize,
    receipt_fetches: AtomicUsize,
}

impl ScriptedLedger {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            ..Default::default()
        }
    }

    pub fn with_block(mut self, block: Block) -> Self {
        self.blocks.insert(block.number, block);
        self
    }

    /// Fetching this height fails as if the endpoint were down.
    pub fn with_failing_block(mut self, height: u64) -> Self {
        self.failing_blocks.insert(height);
        self
    }

    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipts.insert(receipt.transaction_hash, receipt);
        self
    }

    pub fn with_failing_receipt(mut self, hash: TxHash) -> Self {
        self.failing_receipts.insert(hash);
        self
    }

    /// A deployed contract answering `name()`, `symbol()` and `decimals()`.
    pub fn with_token(mut self, address: Address, metadata: TokenMetadata) -> Self {
        self.tokens.insert(address, metadata);
        self
    }

    /// A deployed contract that reverts every call.
    pub fn with_contract(mut self, address: Address) -> Self {
        self.contracts.insert(address);
        self
    }

    pub fn block_fetches(&self) -> usize {
        self.block_fetches.load(Ordering::SeqCst)
    }

    pub fn receipt_fetches(&self) -> usize {
        self.receipt_fetches.load(Ordering::SeqCst)
    }
}

fn reverted(address: Address) -> ScanError {
    ScanError::TransientFetchFailure {
        method: "eth_call",
        item: format!("{address:#x}"),
        reason: "execution reverted".to_string(),
    }
}

#[async_trait]
impl LedgerReader for ScriptedLedger {
    async fn latest_height(&self) -> Result<u64, ScanError> {
        Ok(self.head)
    }

    async fn get_block(&self, height: u64, include_transactions: bool) -> Result<Option<Block>, ScanError> {
        self.block_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_blocks.contains(&height) {
            return Err(ScanError::UpstreamUnavailable {
                method: "get_block_by_number",
                reason: "connection refused".to_string(),
            });
        }

        Ok(self.blocks.get(&height).cloned().map(|mut block| {
            if !include_transactions {
                block.transactions = block
                    .transactions
                    .iter()
                    .map(|tx| Transaction {
                        hash: tx.hash,
                        ..Default::default()
                    })
                    .collect();
            }
            block
        }))
    }

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, ScanError> {
        Ok(self
            .blocks
            .values()
            .flat_map(|block| block.transactions.iter())
            .find(|tx| tx.hash == Some(hash))
            .cloned())
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ScanError> {
        self.receipt_fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_receipts.contains(&hash) {
            return Err(ScanError::TransientFetchFailure {
                method: "get_transaction_receipt",
                item: format!("{hash:#x}"),
                reason: "request timed out".to_string(),
            });
        }
        Ok(self.receipts.get(&hash).cloned())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ScanError> {
        let Some(token) = self.tokens.get(&to) else {
            return Err(reverted(to));
        };

        let encoded = match data.get(..4) {
            Some(selector) if selector == IERC20Metadata::nameCall::SELECTOR => {
                IERC20Metadata::nameCall::abi_encode_returns(&token.name)
            }
            Some(selector) if selector == IERC20Metadata::symbolCall::SELECTOR => {
                IERC20Metadata::symbolCall::abi_encode_returns(&token.symbol)
            }
            Some(selector) if selector == IERC20Metadata::decimalsCall::SELECTOR => {
                IERC20Metadata::decimalsCall::abi_encode_returns(&token.decimals)
            }
            _ => return Err(reverted(to)),
        };
        Ok(Bytes::from(encoded))
    }

    async fn has_code(&self, address: Address) -> Result<bool, ScanError> {
        Ok(self.tokens.contains_key(&address) || self.contracts.contains(&address))
    }
}

/// Wraps a store and counts every write call that reaches it.
#[derive(Debug, Default)]
pub struct CountingStore<S> {
    inner: S,
    writes: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: ProgressStore> ProgressStore for CountingStore<S> {
    async fn is_processed(&self, block_number: u64) -> Result<bool, ScanError> {
        self.inner.is_processed(block_number).await
    }

    async fn mark_processed(&self, block_number: u64) -> Result<(), ScanError> {
        self.record_write();
        self.inner.mark_processed(block_number).await
    }

    async fn last_processed_height(&self) -> Result<Option<u64>, ScanError> {
        self.inner.last_processed_height().await
    }

    async fn processed_count(&self) -> Result<u64, ScanError> {
        self.inner.processed_count().await
    }
}

#[async_trait]
impl<S: TransactionStore> TransactionStore for CountingStore<S> {
    async fn save_transaction(&self, transaction: &StoredTransaction) -> Result<bool, ScanError> {
        self.record_write();
        self.inner.save_transaction(transaction).await
    }

    async fn save_token(&self, token: &TokenRecord) -> Result<bool, ScanError> {
        self.record_write();
        self.inner.save_token(token).await
    }

    async fn save_token_creation(
        &self,
        token: &TokenRecord,
        transaction: &StoredTransaction,
    ) -> Result<(bool, bool), ScanError> {
        self.record_write();
        self.inner.save_token_creation(token, transaction).await
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<StoredTransaction>, ScanError> {
        self.inner.get_transaction(hash).await
    }

    async fn get_token(&self, address: &str) -> Result<Option<TokenRecord>, ScanError> {
        self.inner.get_token(address).await
    }

    async fn transaction_count(&self) -> Result<u64, ScanError> {
        self.inner.transaction_count().await
    }
}

pub mod sqlite;

use async_trait::async_trait;

use crate::models::errors::ScanError;
use crate::models::records::{StoredTransaction, TokenRecord};

/// Durable watermark log: which heights have been fully handled.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn is_processed(&self, block_number: u64) -> Result<bool, ScanError>;

    /// Upsert: marking an already-marked height only refreshes its timestamp.
    async fn mark_processed(&self, block_number: u64) -> Result<(), ScanError>;

    /// Highest processed height, `None` before the first mark.
    async fn last_processed_height(&self) -> Result<Option<u64>, ScanError>;

    async fn processed_count(&self) -> Result<u64, ScanError>;
}

/// Deduplicated record of matched transactions and detected tokens.
///
/// Both `save_*` calls are insert-if-absent and return whether a new row was written.
/// A duplicate key is reported as `Ok(false)`, never as an error.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn save_transaction(&self, transaction: &StoredTransaction) -> Result<bool, ScanError>;

    async fn save_token(&self, token: &TokenRecord) -> Result<bool, ScanError>;

    /// Saves a detected token together with its `token_creation` transaction.
    /// Returns `(token_inserted, transaction_inserted)`.
    async fn save_token_creation(
        &self,
        token: &TokenRecord,
        transaction: &StoredTransaction,
    ) -> Result<(bool, bool), ScanError> {
        let token_saved = self.save_token(token).await?;
        let transaction_saved = self.save_transaction(transaction).await?;
        Ok((token_saved, transaction_saved))
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<StoredTransaction>, ScanError>;

    async fn get_token(&self, address: &str) -> Result<Option<TokenRecord>, ScanError>;

    async fn transaction_count(&self) -> Result<u64, ScanError>;
}

pub trait Store: ProgressStore + TransactionStore {}

impl<S> Store for S where S: ProgressStore + TransactionStore {}

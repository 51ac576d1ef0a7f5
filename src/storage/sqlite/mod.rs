mod schema;

pub use schema::Table;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::chain::TxStatus;
use crate::models::errors::ScanError;
use crate::models::records::{StoredTransaction, TokenRecord, TransactionType};
use crate::storage::{ProgressStore, TransactionStore};
use crate::utils::retry::{RetryConfig, retry};

const POOL_SIZE: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed progress and transaction store.
///
/// Primary keys (`processed_blocks.block_number`, `transactions.hash`, `tokens.address`)
/// carry all deduplication, so concurrent writers need no coordination beyond the pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the database and creates any missing tables, retrying both with backoff.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url '{database_url}'"))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        // Every connection to `:memory:` is a separate database, so pin a single one
        let pool_options = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(POOL_SIZE)
        };

        let retry_config = RetryConfig::default();
        let pool = retry(
            || {
                let options = options.clone();
                let pool_options = pool_options.clone();
                async move { pool_options.connect_with(options).await }
            },
            &retry_config,
            "open_store",
        )
        .await?;

        let store = Self { pool };
        store.init(&retry_config).await?;
        info!("Store ready at {}", database_url);
        Ok(store)
    }

    async fn init(&self, retry_config: &RetryConfig) -> Result<()> {
        for table in Table::ALL {
            retry(
                || async {
                    sqlx::query(table.create_statement())
                        .execute(&self.pool)
                        .await?;
                    for index in table.index_statements() {
                        sqlx::query(*index).execute(&self.pool).await?;
                    }
                    Ok::<(), sqlx::Error>(())
                },
                retry_config,
                &format!("create_table_{table}"),
            )
            .await?;
            debug!("Table '{}' ready", table);
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Store closed");
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// SQLite integers are signed; heights beyond `i64::MAX` cannot be stored.
fn height_param(block_number: u64) -> Result<i64, ScanError> {
    i64::try_from(block_number).map_err(|e| ScanError::Store(sqlx::Error::Encode(Box::new(e))))
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Sqlite>,
    record: &StoredTransaction,
) -> Result<bool, ScanError> {
    let result = sqlx::query(
        "INSERT INTO transactions (
            hash, block_number, timestamp, from_address, to_address, value, gas_used,
            gas_price, input, status, transaction_type, contract_address, is_sonicx_token,
            created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(hash) DO NOTHING",
    )
    .bind(&record.hash)
    .bind(height_param(record.block_number)?)
    .bind(record.timestamp)
    .bind(&record.from_address)
    .bind(&record.to_address)
    .bind(&record.value)
    .bind(&record.gas_used)
    .bind(&record.gas_price)
    .bind(&record.input)
    .bind(record.status.as_str())
    .bind(record.transaction_type.as_str())
    .bind(record.contract_address.as_deref())
    .bind(record.is_sonicx_token)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn insert_token(tx: &mut Transaction<'_, Sqlite>, token: &TokenRecord) -> Result<bool, ScanError> {
    let result = sqlx::query(
        "INSERT INTO tokens (
            address, name, symbol, decimals, creation_tx, creator, is_sonicx_token, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(address) DO NOTHING",
    )
    .bind(&token.address)
    .bind(&token.name)
    .bind(&token.symbol)
    .bind(token.decimals)
    .bind(&token.creation_tx)
    .bind(&token.creator)
    .bind(token.is_sonicx_token)
    .bind(token.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value '{value}'").into(),
    }
}

fn transaction_from_row(row: &SqliteRow) -> Result<StoredTransaction, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let transaction_type: String = row.try_get("transaction_type")?;

    Ok(StoredTransaction {
        hash: row.try_get("hash")?,
        block_number: row.try_get::<u64, _>("block_number")?,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
        from_address: row.try_get("from_address")?,
        to_address: row.try_get("to_address")?,
        value: row.try_get("value")?,
        gas_used: row.try_get("gas_used")?,
        gas_price: row.try_get("gas_price")?,
        input: row.try_get("input")?,
        status: TxStatus::from_db(&status).ok_or_else(|| decode_error("status", &status))?,
        transaction_type: TransactionType::from_db(&transaction_type)
            .ok_or_else(|| decode_error("transaction_type", &transaction_type))?,
        contract_address: row.try_get("contract_address")?,
        is_sonicx_token: row.try_get("is_sonicx_token")?,
    })
}

fn token_from_row(row: &SqliteRow) -> Result<TokenRecord, sqlx::Error> {
    Ok(TokenRecord {
        address: row.try_get("address")?,
        name: row.try_get("name")?,
        symbol: row.try_get("symbol")?,
        decimals: row.try_get("decimals")?,
        creation_tx: row.try_get("creation_tx")?,
        creator: row.try_get("creator")?,
        is_sonicx_token: row.try_get("is_sonicx_token")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn is_processed(&self, block_number: u64) -> Result<bool, ScanError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT block_number FROM processed_blocks WHERE block_number = ?")
                .bind(height_param(block_number)?)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn mark_processed(&self, block_number: u64) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT INTO processed_blocks (block_number, processed_at) VALUES (?, ?)
            ON CONFLICT(block_number) DO UPDATE SET processed_at = excluded.processed_at",
        )
        .bind(height_param(block_number)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_processed_height(&self) -> Result<Option<u64>, ScanError> {
        let height: Option<i64> = sqlx::query_scalar("SELECT MAX(block_number) FROM processed_blocks")
            .fetch_one(&self.pool)
            .await?;
        Ok(height.map(|h| h as u64))
    }

    async fn processed_count(&self) -> Result<u64, ScanError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_blocks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn save_transaction(&self, transaction: &StoredTransaction) -> Result<bool, ScanError> {
        let mut tx = self.pool.begin().await?;
        let saved = insert_transaction(&mut tx, transaction).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn save_token(&self, token: &TokenRecord) -> Result<bool, ScanError> {
        let mut tx = self.pool.begin().await?;
        let saved = insert_token(&mut tx, token).await?;
        tx.commit().await?;
        Ok(saved)
    }

    /// Token and creation transaction commit together.
    async fn save_token_creation(
        &self,
        token: &TokenRecord,
        transaction: &StoredTransaction,
    ) -> Result<(bool, bool), ScanError> {
        let mut tx = self.pool.begin().await?;
        let token_saved = insert_token(&mut tx, token).await?;
        let transaction_saved = insert_transaction(&mut tx, transaction).await?;
        tx.commit().await?;
        Ok((token_saved, transaction_saved))
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<StoredTransaction>, ScanError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(transaction_from_row).transpose()?)
    }

    async fn get_token(&self, address: &str) -> Result<Option<TokenRecord>, ScanError> {
        let row = sqlx::query("SELECT * FROM tokens WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(token_from_row).transpose()?)
    }

    async fn transaction_count(&self) -> Result<u64, ScanError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_transaction(hash: &str) -> StoredTransaction {
        StoredTransaction {
            hash: hash.to_string(),
            block_number: 990,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            from_address: "0x00000000000000000000000000000000000000bb".to_string(),
            to_address: "0x00000000000000000000000000000000000000aa".to_string(),
            value: "1000".to_string(),
            gas_used: "21000".to_string(),
            gas_price: "1000000000".to_string(),
            input: "0x".to_string(),
            status: TxStatus::Success,
            transaction_type: TransactionType::ContractInteraction,
            contract_address: None,
            is_sonicx_token: false,
        }
    }

    fn sample_token(address: &str) -> TokenRecord {
        TokenRecord {
            address: address.to_string(),
            name: "SonicX Token".to_string(),
            symbol: "SNX".to_string(),
            decimals: 18,
            creation_tx: "0x01".to_string(),
            creator: "0x00000000000000000000000000000000000000bb".to_string(),
            is_sonicx_token: true,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_mark_processed_is_idempotent() {
        let store = memory_store().await;
        assert!(!store.is_processed(5).await.unwrap());
        assert_eq!(store.last_processed_height().await.unwrap(), None);

        store.mark_processed(5).await.unwrap();
        store.mark_processed(5).await.unwrap();
        store.mark_processed(3).await.unwrap();

        assert!(store.is_processed(5).await.unwrap());
        assert!(!store.is_processed(4).await.unwrap());
        assert_eq!(store.processed_count().await.unwrap(), 2);
        assert_eq!(store.last_processed_height().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_height_zero_can_be_marked() {
        let store = memory_store().await;
        store.mark_processed(0).await.unwrap();
        assert!(store.is_processed(0).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_transaction_is_insert_if_absent() {
        let store = memory_store().await;
        let first = sample_transaction("0xabc");
        let mut second = sample_transaction("0xabc");
        second.value = "999".to_string();

        assert!(store.save_transaction(&first).await.unwrap());
        assert!(!store.save_transaction(&second).await.unwrap());
        assert_eq!(store.transaction_count().await.unwrap(), 1);

        let stored = store.get_transaction("0xabc").await.unwrap().unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_missing_records_are_none() {
        let store = memory_store().await;
        assert!(store.get_transaction("0xmissing").await.unwrap().is_none());
        assert!(store.get_token("0xmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_with_creation_transaction() {
        let store = memory_store().await;
        let token = sample_token("0x00000000000000000000000000000000000000cc");
        let mut creation = sample_transaction("0x01");
        creation.transaction_type = TransactionType::TokenCreation;
        creation.contract_address = Some(token.address.clone());
        creation.is_sonicx_token = true;

        let saved = store
            .save_token_creation(&token, &creation)
            .await
            .unwrap();
        assert_eq!(saved, (true, true));

        let again = store
            .save_token_creation(&token, &creation)
            .await
            .unwrap();
        assert_eq!(again, (false, false));

        assert_eq!(store.get_token(&token.address).await.unwrap().unwrap(), token);
        let stored = store.get_transaction("0x01").await.unwrap().unwrap();
        assert_eq!(stored.transaction_type, TransactionType::TokenCreation);
        assert!(stored.is_sonicx_token);
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:scan?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://sonicx_scanner.db"));
    }
}

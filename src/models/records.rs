use chrono::{DateTime, Utc};

use crate::models::chain::TxStatus;

// Fallback values for fields the ledger did not provide
pub const UNKNOWN_SENDER: &str = "Unknown";
pub const CONTRACT_CREATION: &str = "Contract Creation";
pub const ZERO_AMOUNT: &str = "0";
pub const EMPTY_INPUT: &str = "0x";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    ContractInteraction,
    TokenCreation,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::ContractInteraction => "contract_interaction",
            TransactionType::TokenCreation => "token_creation",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "contract_interaction" => Some(Self::ContractInteraction),
            "token_creation" => Some(Self::TokenCreation),
            _ => None,
        }
    }
}

/// Normalised, storage-ready transaction keyed by `hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransaction {
    pub hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
    pub gas_used: String,
    pub gas_price: String,
    pub input: String,
    pub status: TxStatus,
    pub transaction_type: TransactionType,
    pub contract_address: Option<String>,
    pub is_sonicx_token: bool,
}

/// A detected token, keyed by its contract address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub creation_tx: String,
    pub creator: String,
    pub is_sonicx_token: bool,
    pub created_at: DateTime<Utc>,
}

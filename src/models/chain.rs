use alloy_primitives::{Address, B256, Bytes, TxHash, U256};

////////////////////////////////////// Ledger Data ///////////////////////////////////////
/////////////////////////////////// eth_getBlockByNumber /////////////////////////////////

/// A block as handed out by the ledger reader. Transactions are always full objects,
/// hash-only responses are resolved before a `Block` is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

/// A ledger transaction. Most fields are optional because standalone lookups and
/// non-standard chains may omit them; consumers fall back to sentinel values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub hash: Option<TxHash>,
    pub from: Option<Address>,
    pub to: Option<Address>, // None => contract creation
    pub value: Option<U256>,
    pub gas_price: Option<u128>,
    pub gas_limit: Option<u64>,
    pub input: Bytes,
    pub block_number: Option<u64>,
    pub timestamp: Option<u64>,
}

impl Transaction {
    pub const fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Direct interaction: the address is either the sender or the recipient.
    pub fn touches(&self, address: Address) -> bool {
        self.to == Some(address) || self.from == Some(address)
    }
}

//////////////////////////////// eth_getTransactionReceipt ///////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
    Unknown,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
            TxStatus::Unknown => "unknown",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub log_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub status: TxStatus,
    pub gas_used: u64,
    pub contract_address: Option<Address>, // Only set for creation transactions
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Indirect interaction: some contract call in this transaction emitted a log from `address`.
    pub fn emitted_by(&self, address: Address) -> bool {
        self.logs.iter().any(|log| log.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const TARGET: Address = address!("0x00000000000000000000000000000000000000aa");
    const OTHER: Address = address!("0x00000000000000000000000000000000000000bb");

    #[test]
    fn test_touches_matches_sender_or_recipient() {
        let to_target = Transaction {
            to: Some(TARGET),
            from: Some(OTHER),
            ..Default::default()
        };
        let from_target = Transaction {
            to: Some(OTHER),
            from: Some(TARGET),
            ..Default::default()
        };
        let unrelated = Transaction {
            to: Some(OTHER),
            from: Some(OTHER),
            ..Default::default()
        };

        assert!(to_target.touches(TARGET));
        assert!(from_target.touches(TARGET));
        assert!(!unrelated.touches(TARGET));
    }

    #[test]
    fn test_creation_has_no_recipient() {
        let creation = Transaction {
            from: Some(OTHER),
            ..Default::default()
        };
        assert!(creation.is_contract_creation());
        assert!(!creation.touches(TARGET));
    }

    #[test]
    fn test_receipt_emitted_by() {
        let receipt = Receipt {
            transaction_hash: TxHash::ZERO,
            status: TxStatus::Success,
            gas_used: 21_000,
            contract_address: None,
            logs: vec![
                Log { address: OTHER, log_index: Some(0) },
                Log { address: TARGET, log_index: Some(1) },
            ],
        };
        assert!(receipt.emitted_by(TARGET));
        assert!(!receipt.emitted_by(address!("0x00000000000000000000000000000000000000cc")));
    }

    #[test]
    fn test_status_round_trips_through_db_labels() {
        for status in [TxStatus::Success, TxStatus::Failed, TxStatus::Unknown] {
            assert_eq!(TxStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(TxStatus::from_db("pending"), None);
    }
}

use alloy_primitives::Address;
use chrono::{DateTime, Utc};

use crate::models::chain::{Receipt, Transaction, TxStatus};
use crate::models::records::{
    CONTRACT_CREATION, StoredTransaction, TransactionType, UNKNOWN_SENDER, ZERO_AMOUNT,
};
use crate::utils::hex_address;

/// Where a transaction was seen: used when the transaction itself lacks position data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
}

pub trait RecordTransformer {
    /// Normalises into a storage record. `None` only when the transaction has no hash.
    fn to_record(&self, receipt: Option<&Receipt>, block: BlockContext) -> Option<StoredTransaction>;

    /// Same as [`RecordTransformer::to_record`], tagged as the creation of an affiliated token.
    fn to_token_creation_record(
        &self,
        receipt: Option<&Receipt>,
        block: BlockContext,
        contract_address: Address,
    ) -> Option<StoredTransaction> {
        self.to_record(receipt, block).map(|record| StoredTransaction {
            transaction_type: TransactionType::TokenCreation,
            contract_address: Some(hex_address(contract_address)),
            is_sonicx_token: true,
            ..record
        })
    }
}

impl RecordTransformer for Transaction {
    fn to_record(&self, receipt: Option<&Receipt>, block: BlockContext) -> Option<StoredTransaction> {
        let hash = self.hash?;
        let timestamp = self.timestamp.unwrap_or(block.timestamp);

        // Gas used: receipt, then the gas limit as an upper bound, then zero
        let gas_used = receipt
            .map(|r| r.gas_used)
            .or(self.gas_limit)
            .map_or_else(|| ZERO_AMOUNT.to_string(), |gas| gas.to_string());

        Some(StoredTransaction {
            hash: format!("{hash:#x}"),
            block_number: self.block_number.unwrap_or(block.number),
            timestamp: DateTime::<Utc>::from_timestamp(timestamp as i64, 0).unwrap_or_default(),
            from_address: self
                .from
                .map_or_else(|| UNKNOWN_SENDER.to_string(), hex_address),
            to_address: self
                .to
                .map_or_else(|| CONTRACT_CREATION.to_string(), hex_address),
            value: self
                .value
                .map_or_else(|| ZERO_AMOUNT.to_string(), |v| v.to_string()),
            gas_used,
            gas_price: self
                .gas_price
                .map_or_else(|| ZERO_AMOUNT.to_string(), |p| p.to_string()),
            input: self.input.to_string(),
            status: receipt.map_or(TxStatus::Unknown, |r| r.status),
            transaction_type: TransactionType::ContractInteraction,
            contract_address: receipt.and_then(|r| r.contract_address).map(hex_address),
            is_sonicx_token: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::records::EMPTY_INPUT;
    use alloy_primitives::{B256, Bytes, U256, address};

    const BLOCK: BlockContext = BlockContext {
        number: 990,
        timestamp: 1_700_000_000,
    };

    #[test]
    fn test_absent_fields_fall_back_to_sentinels() {
        let tx = Transaction {
            hash: Some(B256::repeat_byte(0x11)),
            ..Default::default()
        };
        let record = tx.to_record(None, BLOCK).unwrap();

        assert_eq!(record.from_address, UNKNOWN_SENDER);
        assert_eq!(record.to_address, CONTRACT_CREATION);
        assert_eq!(record.value, "0");
        assert_eq!(record.gas_price, "0");
        assert_eq!(record.gas_used, "0");
        assert_eq!(record.input, EMPTY_INPUT);
        assert_eq!(record.status, TxStatus::Unknown);
        assert_eq!(record.block_number, 990);
        assert_eq!(record.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(record.transaction_type, TransactionType::ContractInteraction);
    }

    #[test]
    fn test_receipt_values_take_precedence() {
        let tx = Transaction {
            hash: Some(B256::repeat_byte(0x22)),
            from: Some(address!("0x00000000000000000000000000000000000000bb")),
            to: Some(address!("0x00000000000000000000000000000000000000aa")),
            value: Some(U256::from(1_000u64)),
            gas_price: Some(1_000_000_000),
            gas_limit: Some(50_000),
            input: Bytes::from_static(&[0xde, 0xad]),
            block_number: Some(991),
            timestamp: None,
        };
        let receipt = Receipt {
            transaction_hash: B256::repeat_byte(0x22),
            status: TxStatus::Failed,
            gas_used: 21_000,
            contract_address: None,
            logs: vec![],
        };

        let with_receipt = tx.to_record(Some(&receipt), BLOCK).unwrap();
        assert_eq!(with_receipt.gas_used, "21000");
        assert_eq!(with_receipt.status, TxStatus::Failed);
        assert_eq!(with_receipt.block_number, 991);
        assert_eq!(with_receipt.from_address, "0x00000000000000000000000000000000000000bb");
        assert_eq!(with_receipt.value, "1000");
        assert_eq!(with_receipt.input, "0xdead");

        // Without a receipt the gas limit stands in for gas used
        let without_receipt = tx.to_record(None, BLOCK).unwrap();
        assert_eq!(without_receipt.gas_used, "50000");
        assert_eq!(without_receipt.status, TxStatus::Unknown);
    }

    #[test]
    fn test_missing_hash_yields_no_record() {
        assert!(Transaction::default().to_record(None, BLOCK).is_none());
    }

    #[test]
    fn test_token_creation_record() {
        let tx = Transaction {
            hash: Some(B256::repeat_byte(0x33)),
            ..Default::default()
        };
        let token = address!("0x00000000000000000000000000000000000000cc");
        let record = tx.to_token_creation_record(None, BLOCK, token).unwrap();

        assert_eq!(record.transaction_type, TransactionType::TokenCreation);
        assert_eq!(
            record.contract_address.as_deref(),
            Some("0x00000000000000000000000000000000000000cc")
        );
        assert!(record.is_sonicx_token);
    }
}

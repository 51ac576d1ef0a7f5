use alloy_consensus::{Eip658Value, Transaction as ConsensusTransaction};
use alloy_network::{AnyRpcTransaction, AnyTransactionReceipt, ReceiptResponse, TransactionResponse};
use alloy_transport::TransportError;

use crate::models::chain::{Log, Receipt, Transaction, TxStatus};
use crate::models::errors::ScanError;
use crate::utils::strip_html;

pub trait TransactionParser {
    fn parse_transaction(&self) -> Transaction;
}

pub trait ReceiptParser {
    fn parse_receipt(&self) -> Receipt;
}

impl TransactionParser for AnyRpcTransaction {
    fn parse_transaction(&self) -> Transaction {
        // RPC `gasPrice` is the effective price when the node reports one
        let gas_price = TransactionResponse::gas_price(self)
            .or_else(|| ConsensusTransaction::gas_price(self));

        Transaction {
            hash: Some(self.tx_hash()),
            from: Some(TransactionResponse::from(self)),
            to: ConsensusTransaction::to(self),
            value: Some(ConsensusTransaction::value(self)),
            gas_price,
            gas_limit: Some(ConsensusTransaction::gas_limit(self)),
            input: ConsensusTransaction::input(self).clone(),
            block_number: TransactionResponse::block_number(self),
            timestamp: None,
        }
    }
}

impl ReceiptParser for AnyTransactionReceipt {
    fn parse_receipt(&self) -> Receipt {
        // Pre-Byzantium receipts carry a state root instead of a status flag
        let status = match self.inner.inner.inner.receipt.status {
            Eip658Value::Eip658(true) => TxStatus::Success,
            Eip658Value::Eip658(false) => TxStatus::Failed,
            Eip658Value::PostState(_) => TxStatus::Unknown,
        };

        Receipt {
            transaction_hash: self.transaction_hash(),
            status,
            gas_used: ReceiptResponse::gas_used(self),
            contract_address: ReceiptResponse::contract_address(self),
            logs: self
                .inner
                .inner
                .logs()
                .iter()
                .map(|log| Log {
                    address: log.address(),
                    log_index: log.log_index,
                })
                .collect(),
        }
    }
}

/// Maps a transport failure onto the scan error taxonomy. Connection-level failures mean the
/// upstream is unreachable; anything the node answered (error response, null, bad payload)
/// is a per-item fetch failure.
pub fn classify_error(method: &'static str, item: impl ToString, error: TransportError) -> ScanError {
    let reason = strip_html(&error.to_string());
    if error.is_transport_error() {
        ScanError::UpstreamUnavailable { method, reason }
    } else {
        ScanError::TransientFetchFailure {
            method,
            item: item.to_string(),
            reason,
        }
    }
}

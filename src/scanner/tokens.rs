use alloy_primitives::{Address, Bytes};
use alloy_sol_types::{SolCall, sol};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::ledger::LedgerReader;
use crate::models::chain::{Receipt, Transaction};
use crate::models::errors::ScanError;
use crate::models::records::{TokenRecord, UNKNOWN_SENDER};
use crate::utils::hex_address;

sol! {
    interface IERC20Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

/// Creation-code prefixes emitted by the Solidity compiler for common token templates.
pub const TOKEN_BYTECODE_PREFIXES: [&[u8]; 2] = [
    &[0x60, 0x80, 0x60, 0x40],
    &[0x60, 0x60, 0x60, 0x40, 0x52],
];

/// Decides whether a detected token belongs to the tracked project.
pub trait AffiliationRule: Send + Sync {
    fn is_affiliated(&self, name: &str, symbol: &str, creator: Option<Address>) -> bool;
}

/// Affiliated when name or symbol contains a marker (case-insensitive) or the creator is the
/// known deployer.
#[derive(Debug, Clone, Default)]
pub struct MarkerAffiliation {
    markers: Vec<String>,
    known_deployer: Option<Address>,
}

impl MarkerAffiliation {
    pub fn new(markers: &[String], known_deployer: Option<Address>) -> Self {
        Self {
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
            known_deployer,
        }
    }
}

impl AffiliationRule for MarkerAffiliation {
    fn is_affiliated(&self, name: &str, symbol: &str, creator: Option<Address>) -> bool {
        let name = name.to_lowercase();
        let symbol = symbol.to_lowercase();
        let marked = self
            .markers
            .iter()
            .any(|marker| name.contains(marker.as_str()) || symbol.contains(marker.as_str()));

        marked || (creator.is_some() && creator == self.known_deployer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// An affiliated token, ready to persist.
#[derive(Debug, Clone)]
pub struct DetectedToken {
    pub contract_address: Address,
    pub record: TokenRecord,
}

/// Outcome of classifying one transaction. The receipt is kept whenever it was fetched, so
/// the interaction filter does not have to ask for it again.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub receipt: Option<Receipt>,
    pub token: Option<DetectedToken>,
}

/// Contract creation whose init code starts with a known token template prefix.
pub fn is_token_candidate(tx: &Transaction) -> bool {
    tx.is_contract_creation()
        && TOKEN_BYTECODE_PREFIXES
            .iter()
            .any(|prefix| tx.input.starts_with(prefix))
}

#[derive(Clone)]
pub struct TokenClassifier {
    rule: Arc<dyn AffiliationRule>,
}

impl TokenClassifier {
    pub fn new(rule: Arc<dyn AffiliationRule>) -> Self {
        Self { rule }
    }

    /// Runs one transaction through the classifier.
    ///
    /// A `None` token is a rejection: not a candidate, no created contract, not a token, or
    /// not affiliated. `Err` means the check itself could not complete.
    pub async fn classify<L>(&self, ledger: &L, tx: &Transaction) -> Result<Classification, ScanError>
    where
        L: LedgerReader + ?Sized,
    {
        if !is_token_candidate(tx) {
            return Ok(Classification::default());
        }
        let Some(hash) = tx.hash else {
            return Ok(Classification::default());
        };

        let receipt = ledger
            .get_receipt(hash)
            .await
            .map_err(|e| ScanError::classification(format!("{hash:#x}"), e))?;
        let Some(receipt) = receipt else {
            return Ok(Classification::default());
        };

        let token = self.inspect_created_contract(ledger, tx, &receipt).await?;
        Ok(Classification {
            receipt: Some(receipt),
            token,
        })
    }

    async fn inspect_created_contract<L>(
        &self,
        ledger: &L,
        tx: &Transaction,
        receipt: &Receipt,
    ) -> Result<Option<DetectedToken>, ScanError>
    where
        L: LedgerReader + ?Sized,
    {
        let hash = receipt.transaction_hash;
        let Some(contract_address) = receipt.contract_address else {
            debug!("Creation {:#x} produced no contract", hash);
            return Ok(None);
        };

        let has_code = ledger
            .has_code(contract_address)
            .await
            .map_err(|e| ScanError::classification(format!("{hash:#x}"), e))?;
        if !has_code {
            return Ok(None);
        }

        let Some(metadata) = probe_metadata(ledger, contract_address).await else {
            debug!("Contract {:#x} does not expose token metadata", contract_address);
            return Ok(None);
        };

        if !self.rule.is_affiliated(&metadata.name, &metadata.symbol, tx.from) {
            debug!(
                "Token {} ({}) at {:#x} is not affiliated",
                metadata.name, metadata.symbol, contract_address
            );
            return Ok(None);
        }

        let record = TokenRecord {
            address: hex_address(contract_address),
            name: metadata.name,
            symbol: metadata.symbol,
            decimals: metadata.decimals,
            creation_tx: format!("{hash:#x}"),
            creator: tx.from.map_or_else(|| UNKNOWN_SENDER.to_string(), hex_address),
            is_sonicx_token: true,
            created_at: Utc::now(),
        };

        Ok(Some(DetectedToken {
            contract_address,
            record,
        }))
    }
}

/// `name()`, `symbol()` and `decimals()`; `None` if any call reverts or decodes badly.
pub async fn probe_metadata<L>(ledger: &L, address: Address) -> Option<TokenMetadata>
where
    L: LedgerReader + ?Sized,
{
    let (name, symbol, decimals) = futures::join!(
        ledger.call(address, Bytes::from(IERC20Metadata::nameCall {}.abi_encode())),
        ledger.call(address, Bytes::from(IERC20Metadata::symbolCall {}.abi_encode())),
        ledger.call(address, Bytes::from(IERC20Metadata::decimalsCall {}.abi_encode())),
    );

    Some(TokenMetadata {
        name: IERC20Metadata::nameCall::abi_decode_returns(&name.ok()?).ok()?,
        symbol: IERC20Metadata::symbolCall::abi_decode_returns(&symbol.ok()?).ok()?,
        decimals: IERC20Metadata::decimalsCall::abi_decode_returns(&decimals.ok()?).ok()?,
    })
}

use alloy_primitives::{Address, TxHash};
use futures::future::join_all;
use std::collections::HashMap;
use tracing::warn;

use crate::ledger::LedgerReader;
use crate::models::chain::{Receipt, Transaction};

/// A transaction that interacted with the target, plus the receipt if the match needed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction<'a> {
    pub transaction: &'a Transaction,
    pub receipt: Option<Receipt>,
}

/// Narrows `transactions` to those touching `target`, keeping their relative order.
///
/// Direct `to`/`from` matches are taken without a receipt. Everything else is matched
/// through the emitting addresses of its receipt logs, `max_concurrency` receipts at a time.
/// Receipts already in `known_receipts` are used as-is and never fetched again.
/// With no target every transaction is relevant. Transactions without a hash are dropped.
pub async fn filter_interactions<'a, L>(
    ledger: &L,
    transactions: &'a [Transaction],
    target: Option<Address>,
    max_concurrency: usize,
    known_receipts: &HashMap<TxHash, Receipt>,
) -> Vec<Interaction<'a>>
where
    L: LedgerReader + ?Sized,
{
    let hashed: Vec<&Transaction> = transactions.iter().filter(|tx| tx.hash.is_some()).collect();

    let Some(target) = target else {
        return hashed
            .into_iter()
            .map(|transaction| Interaction {
                transaction,
                receipt: None,
            })
            .collect();
    };

    let mut matched = Vec::new();
    for chunk in hashed.chunks(max_concurrency.max(1)) {
        let results = join_all(
            chunk
                .iter()
                .map(|tx| match_transaction(ledger, *tx, target, known_receipts)),
        )
        .await;
        matched.extend(results.into_iter().flatten());
    }
    matched
}

async fn match_transaction<'a, L>(
    ledger: &L,
    transaction: &'a Transaction,
    target: Address,
    known_receipts: &HashMap<TxHash, Receipt>,
) -> Option<Interaction<'a>>
where
    L: LedgerReader + ?Sized,
{
    if transaction.touches(target) {
        return Some(Interaction {
            transaction,
            receipt: None,
        });
    }

    let hash = transaction.hash?;
    if let Some(receipt) = known_receipts.get(&hash) {
        return receipt.emitted_by(target).then(|| Interaction {
            transaction,
            receipt: Some(receipt.clone()),
        });
    }

    match ledger.get_receipt(hash).await {
        Ok(Some(receipt)) if receipt.emitted_by(target) => Some(Interaction {
            transaction,
            receipt: Some(receipt),
        }),
        Ok(_) => None,
        Err(e) => {
            warn!("Skipping transaction {:#x}: receipt lookup failed: {}", hash, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chain::{Log, TxStatus};
    use crate::test_utils::ScriptedLedger;
    use alloy_primitives::{B256, address};

    const TARGET: Address = address!("0x00000000000000000000000000000000000000aa");
    const OTHER: Address = address!("0x00000000000000000000000000000000000000bb");
    const ROUTER: Address = address!("0x00000000000000000000000000000000000000cc");

    fn tx(byte: u8, from: Address, to: Option<Address>) -> Transaction {
        Transaction {
            hash: Some(B256::repeat_byte(byte)),
            from: Some(from),
            to,
            ..Default::default()
        }
    }

    fn receipt(byte: u8, emitters: &[Address]) -> Receipt {
        Receipt {
            transaction_hash: B256::repeat_byte(byte),
            status: TxStatus::Success,
            gas_used: 21_000,
            contract_address: None,
            logs: emitters
                .iter()
                .enumerate()
                .map(|(i, address)| Log {
                    address: *address,
                    log_index: Some(i as u64),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_direct_matches_need_no_receipt() {
        let ledger = ScriptedLedger::new(0);
        let txs = vec![tx(1, OTHER, Some(TARGET)), tx(2, TARGET, Some(OTHER))];

        let matched = filter_interactions(&ledger, &txs, Some(TARGET), 4, &HashMap::new()).await;

        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|m| m.receipt.is_none()));
        assert_eq!(ledger.receipt_fetches(), 0);
    }

    #[tokio::test]
    async fn test_indirect_match_through_logs_keeps_order() {
        let ledger = ScriptedLedger::new(0)
            .with_receipt(receipt(2, &[ROUTER, TARGET]))
            .with_receipt(receipt(4, &[ROUTER]));
        let txs = vec![
            tx(1, OTHER, Some(TARGET)),
            tx(2, OTHER, Some(ROUTER)),
            tx(3, TARGET, Some(OTHER)),
            tx(4, OTHER, Some(ROUTER)),
            tx(5, OTHER, Some(TARGET)),
        ];

        // Small chunks exercise ordering across chunk boundaries
        let matched = filter_interactions(&ledger, &txs, Some(TARGET), 2, &HashMap::new()).await;
        let hashes: Vec<_> = matched.iter().map(|m| m.transaction.hash).collect();

        assert_eq!(
            hashes,
            vec![txs[0].hash, txs[1].hash, txs[2].hash, txs[4].hash]
        );
        assert!(matched[1].receipt.is_some());
        assert_eq!(ledger.receipt_fetches(), 2);
    }

    #[tokio::test]
    async fn test_receipt_failure_excludes_only_that_transaction() {
        let ledger = ScriptedLedger::new(0)
            .with_failing_receipt(B256::repeat_byte(1))
            .with_receipt(receipt(2, &[TARGET]));
        let txs = vec![tx(1, OTHER, Some(ROUTER)), tx(2, OTHER, Some(ROUTER))];

        let matched = filter_interactions(&ledger, &txs, Some(TARGET), 4, &HashMap::new()).await;

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].transaction.hash, Some(B256::repeat_byte(2)));
    }

    #[tokio::test]
    async fn test_missing_hash_is_excluded() {
        let ledger = ScriptedLedger::new(0);
        let txs = vec![Transaction {
            to: Some(TARGET),
            ..Default::default()
        }];

        assert!(filter_interactions(&ledger, &txs, Some(TARGET), 4, &HashMap::new()).await.is_empty());
        assert!(filter_interactions(&ledger, &txs, None, 4, &HashMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_target_keeps_everything() {
        let ledger = ScriptedLedger::new(0);
        let txs = vec![tx(1, OTHER, Some(ROUTER)), tx(2, OTHER, None)];

        let matched = filter_interactions(&ledger, &txs, None, 4, &HashMap::new()).await;

        assert_eq!(matched.len(), 2);
        assert_eq!(ledger.receipt_fetches(), 0);
    }

    #[tokio::test]
    async fn test_known_receipts_are_not_fetched_again() {
        let ledger = ScriptedLedger::new(0).with_receipt(receipt(3, &[TARGET]));
        let txs = vec![
            tx(1, OTHER, Some(ROUTER)),
            tx(2, OTHER, Some(ROUTER)),
            tx(3, OTHER, Some(ROUTER)),
        ];
        let known = HashMap::from([
            (B256::repeat_byte(1), receipt(1, &[TARGET])),
            (B256::repeat_byte(2), receipt(2, &[ROUTER])),
        ]);

        let matched = filter_interactions(&ledger, &txs, Some(TARGET), 4, &known).await;
        let hashes: Vec<_> = matched.iter().map(|m| m.transaction.hash).collect();

        assert_eq!(hashes, vec![txs[0].hash, txs[2].hash]);
        assert!(matched.iter().all(|m| m.receipt.is_some()));
        // Only the unseeded transaction went to the ledger
        assert_eq!(ledger.receipt_fetches(), 1);
    }
}

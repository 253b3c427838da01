use tracing::info;

use adnoto_core::text::ellipsize;
use adnoto_core::OrderHistory;
use adnoto_ledger::{LedgerApi, LedgerError, SaveTransaction, TransactionCache};

use crate::engine::Match;

/// Memo length ceiling imposed by the ledger service.
const MAX_MEMO_LENGTH: usize = 200;

/// Builds memo text for matched transactions and writes it back in one
/// batch, mirroring each successful write into the local cache.
pub struct Annotator {
    pub max_item_length: usize,
}

impl Annotator {
    pub fn new(max_item_length: usize) -> Self {
        Annotator { max_item_length }
    }

    /// Item titles joined into a single memo line. Each item is capped at
    /// `max_item_length` characters, the joined result at 200.
    pub fn build_memo(&self, items: &[String]) -> String {
        let joined = items
            .iter()
            .map(|item| ellipsize(item, self.max_item_length))
            .collect::<Vec<_>>()
            .join(", ");
        ellipsize(&joined, MAX_MEMO_LENGTH)
    }

    /// Write memos for every match in one batched request. On success the
    /// memos are mirrored into the cache, so an annotated transaction is
    /// never offered as a match candidate again.
    pub async fn apply<L: LedgerApi>(
        &self,
        ledger: &L,
        matches: &[Match],
        orders: &OrderHistory,
        cache: &mut TransactionCache,
    ) -> Result<usize, LedgerError> {
        if matches.is_empty() {
            return Ok(0);
        }

        let mut updates = Vec::with_capacity(matches.len());
        for m in matches {
            let Some(order) = orders.get(m.order_index) else { continue };
            let memo = self.build_memo(&order.items);
            if let Some(tx) = cache.get(&m.transaction_id) {
                info!("adding memo {memo:?} to {}", tx.pretty());
            }
            updates.push(SaveTransaction {
                id: m.transaction_id.clone(),
                memo,
                approved: false,
            });
        }

        let written = ledger.update_transactions(cache.budget_id(), &updates).await?;
        for update in &updates {
            cache.set_memo(&update.id, &update.memo);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MatchEngine;
    use adnoto_core::{MerchantSignature, Milliunits, Order, TransactionId};
    use adnoto_ledger::{MockLedger, WireTransaction};
    use chrono::NaiveDate;

    fn annotator() -> Annotator {
        Annotator::new(45)
    }

    fn order_with_items(items: &[&str]) -> Order {
        Order {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            amount: Milliunits::new(-52_300),
            items: items.iter().map(|s| s.to_string()).collect(),
            source_ref: "msg-1".to_string(),
        }
    }

    fn wire(id: &str) -> WireTransaction {
        WireTransaction {
            id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            amount: -52_300,
            payee_name: Some("Amazon.com".to_string()),
            memo: None,
            deleted: false,
        }
    }

    async fn fixture(ledger: &MockLedger) -> (OrderHistory, TransactionCache) {
        ledger.push_delta(vec![wire("t1")], 1);
        let mut cache = TransactionCache::new("budget-1", MerchantSignature::default());
        cache.refresh(ledger, None).await.unwrap();
        let mut orders = OrderHistory::new(100);
        orders.push(order_with_items(&["USB-C Cable, 6ft"]));
        (orders, cache)
    }

    // ── Memo building ─────────────────────────────────────────────────────────

    #[test]
    fn short_items_join_unchanged() {
        let memo = annotator().build_memo(&["USB-C Cable, 6ft".to_string(), "Desk Lamp".to_string()]);
        assert_eq!(memo, "USB-C Cable, 6ft, Desk Lamp");
    }

    #[test]
    fn long_item_is_truncated_to_exact_length() {
        let long = "Ergonomic Vertical Wireless Mouse with Adjustable DPI and Silent Buttons";
        let memo = annotator().build_memo(&[long.to_string()]);
        assert_eq!(memo.chars().count(), 45);
        assert!(memo.ends_with("..."));
    }

    #[test]
    fn joined_memo_is_hard_capped_at_200() {
        let items: Vec<String> = (0..10)
            .map(|i| format!("Reasonably Long Product Title Number {i} With Extras"))
            .collect();
        let memo = annotator().build_memo(&items);
        assert_eq!(memo.chars().count(), 200);
        assert!(memo.ends_with("..."));
    }

    #[test]
    fn memo_exactly_at_cap_is_untouched() {
        let annotator = Annotator::new(250);
        let item = "x".repeat(200);
        assert_eq!(annotator.build_memo(&[item.clone()]), item);
    }

    // ── Write-back ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn apply_writes_batch_and_mirrors_cache() {
        let ledger = MockLedger::new();
        let (orders, mut cache) = fixture(&ledger).await;
        let matches = MatchEngine::default().find_matches(&orders, &cache);

        let written = annotator()
            .apply(&ledger, &matches, &orders, &mut cache)
            .await
            .unwrap();

        assert_eq!(written, 1);
        let recorded = ledger.recorded_updates();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].memo, "USB-C Cable, 6ft");
        assert!(!recorded[0].approved);
        assert_eq!(
            cache.get(&TransactionId("t1".to_string())).unwrap().memo,
            "USB-C Cable, 6ft"
        );
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let ledger = MockLedger::new();
        let (orders, mut cache) = fixture(&ledger).await;
        let engine = MatchEngine::default();

        let matches = engine.find_matches(&orders, &cache);
        annotator().apply(&ledger, &matches, &orders, &mut cache).await.unwrap();

        // The annotated transaction is filtered out of the next match run.
        let rematches = engine.find_matches(&orders, &cache);
        assert!(rematches.is_empty());
        let written = annotator().apply(&ledger, &rematches, &orders, &mut cache).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(ledger.recorded_updates().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_back_leaves_candidates_available() {
        let ledger = MockLedger::new();
        let (orders, mut cache) = fixture(&ledger).await;
        let engine = MatchEngine::default();
        let matches = engine.find_matches(&orders, &cache);

        ledger.fail_next_update();
        let result = annotator().apply(&ledger, &matches, &orders, &mut cache).await;
        assert!(result.is_err());

        // The local memo was not mirrored, so the transaction is re-offered.
        assert_eq!(cache.get(&TransactionId("t1".to_string())).unwrap().memo, "");
        assert_eq!(engine.find_matches(&orders, &cache).len(), 1);
    }

    #[tokio::test]
    async fn apply_with_no_matches_skips_the_ledger_call() {
        let ledger = MockLedger::new();
        let (orders, mut cache) = fixture(&ledger).await;
        let written = annotator().apply(&ledger, &[], &orders, &mut cache).await.unwrap();
        assert_eq!(written, 0);
        assert!(ledger.recorded_updates().is_empty());
    }
}

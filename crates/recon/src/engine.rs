use adnoto_core::{OrderHistory, TransactionId};
use adnoto_ledger::TransactionCache;

const MS_PER_DAY: i64 = 86_400_000;

/// A proposed one-to-one pairing of an order and a transaction, with the
/// distances that ranked it. Lives only within one matcher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub order_index: usize,
    pub transaction_id: TransactionId,
    pub date_difference_ms: i64,
    pub price_difference_milli: i64,
}

/// Tolerance-based matcher pairing recent orders with cached transactions.
/// Assignment is greedy on sorted distances; locally best, not globally
/// optimal.
pub struct MatchEngine {
    pub date_tolerance_days: f64,
    pub dollar_tolerance: f64,
}

impl Default for MatchEngine {
    fn default() -> Self {
        MatchEngine { date_tolerance_days: 4.0, dollar_tolerance: 0.5 }
    }
}

impl MatchEngine {
    pub fn new(date_tolerance_days: f64, dollar_tolerance: f64) -> Self {
        MatchEngine { date_tolerance_days, dollar_tolerance }
    }

    /// Produce a conflict-free set of pairings: each order and each
    /// transaction appears at most once. Read-only on both inputs.
    pub fn find_matches(&self, orders: &OrderHistory, cache: &TransactionCache) -> Vec<Match> {
        let max_date_ms = (self.date_tolerance_days * MS_PER_DAY as f64) as i64;
        let max_price_milli = (self.dollar_tolerance * 1000.0).round() as i64;

        let mut candidates = Vec::new();

        'orders: for (order_index, order) in orders.iter().enumerate() {
            for (transaction_id, transaction) in cache.iter() {
                if !cache.filter().memo_overwritable(&transaction.memo) {
                    continue;
                }

                let date_difference_ms =
                    (order.date - transaction.date).num_days().abs() * MS_PER_DAY;
                let price_difference_milli =
                    (order.amount.abs().raw() - transaction.amount.abs().raw()).abs();

                if date_difference_ms <= max_date_ms && price_difference_milli <= max_price_milli {
                    candidates.push(Match {
                        order_index,
                        transaction_id: transaction_id.clone(),
                        date_difference_ms,
                        price_difference_milli,
                    });
                }

                // An exact hit ends the scan for this order; it must not
                // also pick up a second, worse transaction.
                if date_difference_ms == 0 && price_difference_milli == 0 {
                    continue 'orders;
                }
            }
        }

        candidates.sort_by_key(|m| (m.date_difference_ms, m.price_difference_milli));
        consume_greedy(candidates)
    }
}

/// Repeatedly take the best remaining candidate, discarding every other
/// candidate that shares its order or its transaction.
fn consume_greedy(mut candidates: Vec<Match>) -> Vec<Match> {
    let mut matches = Vec::new();
    while !candidates.is_empty() {
        let best = candidates.remove(0);
        candidates.retain(|m| {
            m.transaction_id != best.transaction_id && m.order_index != best.order_index
        });
        matches.push(best);
    }
    matches
}

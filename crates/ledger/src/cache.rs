use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use adnoto_core::{MerchantSignature, Transaction, TransactionId};

use crate::client::{LedgerApi, LedgerError, WireTransaction};

/// Counts from one refresh cycle, for log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshStats {
    /// Records in the delta before filtering.
    pub fetched: usize,
    /// Records inserted or overwritten.
    pub cached: usize,
    /// Records removed because the ledger deleted them.
    pub deleted: usize,
}

/// In-memory mirror of the merchant's ledger transactions, kept current
/// through delta sync. Holds only transactions whose payee matches the
/// merchant and whose memo is still empty or an overwritable placeholder.
/// Ordered by id so matching scans are deterministic.
pub struct TransactionCache {
    budget_id: String,
    filter: MerchantSignature,
    entries: BTreeMap<TransactionId, Transaction>,
    server_knowledge: Option<i64>,
}

impl TransactionCache {
    pub fn new(budget_id: impl Into<String>, filter: MerchantSignature) -> Self {
        TransactionCache {
            budget_id: budget_id.into(),
            filter,
            entries: BTreeMap::new(),
            server_knowledge: None,
        }
    }

    /// Pull changes since the last refresh and fold them into the mirror.
    /// The first call (no stored cursor) is a full sync.
    pub async fn refresh<L: LedgerApi>(
        &mut self,
        ledger: &L,
        since: Option<NaiveDate>,
    ) -> Result<RefreshStats, LedgerError> {
        let delta = ledger
            .get_transactions(&self.budget_id, since, self.server_knowledge)
            .await?;
        self.server_knowledge = Some(delta.server_knowledge);

        let mut stats = RefreshStats { fetched: delta.transactions.len(), ..RefreshStats::default() };
        for wire in delta.transactions {
            if !self.admits(&wire) {
                continue;
            }
            let tx = Transaction::from(wire);
            if tx.deleted {
                if self.entries.remove(&tx.id).is_some() {
                    debug!("dropped deleted transaction: {}", tx.pretty());
                    stats.deleted += 1;
                }
            } else {
                debug!("cached transaction: {}", tx.pretty());
                self.entries.insert(tx.id.clone(), tx);
                stats.cached += 1;
            }
        }
        Ok(stats)
    }

    fn admits(&self, wire: &WireTransaction) -> bool {
        let payee_ok = wire
            .payee_name
            .as_deref()
            .is_some_and(|p| self.filter.matches_payee(p));
        let memo_ok = wire
            .memo
            .as_deref()
            .map_or(true, |m| self.filter.memo_overwritable(m));
        payee_ok && memo_ok
    }

    /// Mirror a successful memo write-back without a re-fetch.
    pub fn set_memo(&mut self, id: &TransactionId, memo: &str) {
        if let Some(tx) = self.entries.get_mut(id) {
            tx.memo = memo.to_string();
        }
    }

    pub fn budget_id(&self) -> &str {
        &self.budget_id
    }

    pub fn filter(&self) -> &MerchantSignature {
        &self.filter
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &TransactionId) -> Option<&Transaction> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TransactionId, &Transaction)> {
        self.entries.iter()
    }

    pub fn server_knowledge(&self) -> Option<i64> {
        self.server_knowledge
    }
}

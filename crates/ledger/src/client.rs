use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use adnoto_core::{Milliunits, Transaction, TransactionId};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Ledger API error ({status}): {detail}")]
    Api { status: u16, detail: String },
    #[error("Unknown budget id: {0}")]
    BudgetNotFound(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Budget {
    pub id: String,
    pub name: String,
}

/// One transaction as returned by the ledger API.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTransaction {
    pub id: String,
    pub date: NaiveDate,
    /// Milliunits; negative for outflows.
    pub amount: i64,
    pub payee_name: Option<String>,
    pub memo: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl From<WireTransaction> for Transaction {
    fn from(wire: WireTransaction) -> Self {
        Transaction {
            id: TransactionId(wire.id),
            date: wire.date,
            amount: Milliunits::new(wire.amount),
            payee_name: wire.payee_name,
            memo: wire.memo.unwrap_or_default(),
            deleted: wire.deleted,
        }
    }
}

/// Everything changed since the supplied server knowledge, plus the new
/// knowledge cursor to hand back on the next call.
#[derive(Debug, Clone)]
pub struct TransactionsDelta {
    pub transactions: Vec<WireTransaction>,
    pub server_knowledge: i64,
}

/// A memo update written back to the ledger. `approved` stays false so the
/// transaction still goes through the user's review flow.
#[derive(Debug, Clone, Serialize)]
pub struct SaveTransaction {
    pub id: TransactionId,
    pub memo: String,
    pub approved: bool,
}

/// The budgeting-service operations the pipeline consumes.
#[allow(async_fn_in_trait)]
pub trait LedgerApi {
    async fn get_budgets(&self) -> Result<Vec<Budget>, LedgerError>;

    /// Fetch transactions, optionally restricted to `since_date` and to
    /// changes after `server_knowledge` (delta sync).
    async fn get_transactions(
        &self,
        budget_id: &str,
        since_date: Option<NaiveDate>,
        server_knowledge: Option<i64>,
    ) -> Result<TransactionsDelta, LedgerError>;

    /// Apply a batch of memo updates; returns how many were accepted.
    async fn update_transactions(
        &self,
        budget_id: &str,
        updates: &[SaveTransaction],
    ) -> Result<usize, LedgerError>;
}

// ── HTTP client ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct BudgetsData {
    budgets: Vec<Budget>,
}

#[derive(Deserialize)]
struct TransactionsData {
    transactions: Vec<WireTransaction>,
    server_knowledge: i64,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    transactions: &'a [SaveTransaction],
}

#[derive(Deserialize)]
struct UpdateData {
    transaction_ids: Vec<String>,
}

/// YNAB-v1-shaped HTTP client for the budgeting service.
pub struct YnabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl YnabClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        YnabClient {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

impl LedgerApi for YnabClient {
    async fn get_budgets(&self) -> Result<Vec<Budget>, LedgerError> {
        let url = format!("{}/budgets", self.base_url);
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let env: Envelope<BudgetsData> = check(resp).await?.json().await?;
        Ok(env.data.budgets)
    }

    async fn get_transactions(
        &self,
        budget_id: &str,
        since_date: Option<NaiveDate>,
        server_knowledge: Option<i64>,
    ) -> Result<TransactionsDelta, LedgerError> {
        let url = format!("{}/budgets/{}/transactions", self.base_url, budget_id);
        let mut req = self.http.get(&url).bearer_auth(&self.token);
        if let Some(date) = since_date {
            req = req.query(&[("since_date", date.format("%Y-%m-%d").to_string())]);
        }
        if let Some(knowledge) = server_knowledge {
            req = req.query(&[("last_knowledge_of_server", knowledge.to_string())]);
        }
        let env: Envelope<TransactionsData> = check(req.send().await?).await?.json().await?;
        Ok(TransactionsDelta {
            transactions: env.data.transactions,
            server_knowledge: env.data.server_knowledge,
        })
    }

    async fn update_transactions(
        &self,
        budget_id: &str,
        updates: &[SaveTransaction],
    ) -> Result<usize, LedgerError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let url = format!("{}/budgets/{}/transactions", self.base_url, budget_id);
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&UpdateBody { transactions: updates })
            .send()
            .await?;
        let env: Envelope<UpdateData> = check(resp).await?.json().await?;
        Ok(env.data.transaction_ids.len())
    }
}

/// Surface non-2xx responses as API errors with whatever detail the body has.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, LedgerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp.text().await.unwrap_or_default();
    Err(LedgerError::Api { status: status.as_u16(), detail })
}

// ── Mock ledger (always available, used in tests) ────────────────────────────

/// In-memory stand-in for the budgeting service. Deltas queued with
/// [`push_delta`](MockLedger::push_delta) are served one per refresh;
/// queries and updates are recorded for assertions.
#[derive(Default)]
pub struct MockLedger {
    budgets: Vec<Budget>,
    deltas: Mutex<VecDeque<TransactionsDelta>>,
    last_knowledge: Mutex<i64>,
    queries: Mutex<Vec<(Option<NaiveDate>, Option<i64>)>>,
    updates: Mutex<Vec<SaveTransaction>>,
    refresh_fail: AtomicBool,
    update_fail: AtomicBool,
}

impl MockLedger {
    pub fn new() -> Self {
        MockLedger {
            budgets: vec![Budget { id: "budget-1".to_string(), name: "Test Budget".to_string() }],
            ..MockLedger::default()
        }
    }

    pub fn push_delta(&self, transactions: Vec<WireTransaction>, server_knowledge: i64) {
        self.deltas
            .lock()
            .unwrap()
            .push_back(TransactionsDelta { transactions, server_knowledge });
    }

    /// Make the next transactions fetch fail once.
    pub fn fail_next_refresh(&self) {
        self.refresh_fail.store(true, Ordering::SeqCst);
    }

    /// Make the next update batch fail once.
    pub fn fail_next_update(&self) {
        self.update_fail.store(true, Ordering::SeqCst);
    }

    /// `(since_date, server_knowledge)` of every transactions fetch so far.
    pub fn recorded_queries(&self) -> Vec<(Option<NaiveDate>, Option<i64>)> {
        self.queries.lock().unwrap().clone()
    }

    /// Every update written so far, across batches.
    pub fn recorded_updates(&self) -> Vec<SaveTransaction> {
        self.updates.lock().unwrap().clone()
    }
}

impl LedgerApi for MockLedger {
    async fn get_budgets(&self) -> Result<Vec<Budget>, LedgerError> {
        Ok(self.budgets.clone())
    }

    async fn get_transactions(
        &self,
        _budget_id: &str,
        since_date: Option<NaiveDate>,
        server_knowledge: Option<i64>,
    ) -> Result<TransactionsDelta, LedgerError> {
        self.queries.lock().unwrap().push((since_date, server_knowledge));
        if self.refresh_fail.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Api { status: 503, detail: "service unavailable".to_string() });
        }
        match self.deltas.lock().unwrap().pop_front() {
            Some(delta) => {
                *self.last_knowledge.lock().unwrap() = delta.server_knowledge;
                Ok(delta)
            }
            None => Ok(TransactionsDelta {
                transactions: Vec::new(),
                server_knowledge: *self.last_knowledge.lock().unwrap(),
            }),
        }
    }

    async fn update_transactions(
        &self,
        _budget_id: &str,
        updates: &[SaveTransaction],
    ) -> Result<usize, LedgerError> {
        if self.update_fail.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Api { status: 400, detail: "update rejected".to_string() });
        }
        self.updates.lock().unwrap().extend_from_slice(updates);
        Ok(updates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn wire_transaction_converts_to_domain() {
        let tx: Transaction = wire("t1").into();
        assert_eq!(tx.id, TransactionId("t1".to_string()));
        assert_eq!(tx.amount, Milliunits::new(-52_300));
        assert_eq!(tx.memo, "");
        assert!(!tx.deleted);
    }

    #[test]
    fn wire_transaction_deserializes_from_api_json() {
        let json = r#"{
            "id": "t1",
            "date": "2024-03-02",
            "amount": -52300,
            "payee_name": "Amazon.com",
            "memo": null,
            "deleted": false
        }"#;
        let wire: WireTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(wire.date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(wire.amount, -52_300);
        assert!(wire.memo.is_none());
    }

    #[test]
    fn save_transaction_serializes_unapproved() {
        let save = SaveTransaction {
            id: TransactionId("t1".to_string()),
            memo: "USB-C Cable, 6ft".to_string(),
            approved: false,
        };
        let json = serde_json::to_value(&save).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["approved"], false);
    }

    #[tokio::test]
    async fn mock_serves_deltas_in_order_then_empties() {
        let ledger = MockLedger::new();
        ledger.push_delta(vec![wire("t1")], 10);

        let first = ledger.get_transactions("budget-1", None, None).await.unwrap();
        assert_eq!(first.transactions.len(), 1);
        assert_eq!(first.server_knowledge, 10);

        let second = ledger.get_transactions("budget-1", None, Some(10)).await.unwrap();
        assert!(second.transactions.is_empty());
        assert_eq!(second.server_knowledge, 10);

        assert_eq!(ledger.recorded_queries(), vec![(None, None), (None, Some(10))]);
    }

    #[tokio::test]
    async fn mock_failure_flags_fire_once() {
        let ledger = MockLedger::new();
        ledger.fail_next_refresh();
        assert!(ledger.get_transactions("budget-1", None, None).await.is_err());
        assert!(ledger.get_transactions("budget-1", None, None).await.is_ok());

        ledger.fail_next_update();
        let save = SaveTransaction {
            id: TransactionId("t1".to_string()),
            memo: String::new(),
            approved: false,
        };
        assert!(ledger.update_transactions("budget-1", &[save.clone()]).await.is_err());
        assert_eq!(ledger.update_transactions("budget-1", &[save]).await.unwrap(), 1);
    }
}

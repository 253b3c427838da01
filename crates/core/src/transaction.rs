use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Milliunits;

/// Opaque stable identifier assigned by the ledger service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local mirror of a ledger transaction. The authoritative copy lives in the
/// external budgeting service; only the memo is ever written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    pub amount: Milliunits,
    pub payee_name: Option<String>,
    pub memo: String,
    pub deleted: bool,
}

impl Transaction {
    /// One-line description used in log output.
    pub fn pretty(&self) -> String {
        format!(
            "{} transaction on {} of {}",
            self.payee_name.as_deref().unwrap_or("(No Payee)"),
            self.date,
            self.amount
        )
    }
}

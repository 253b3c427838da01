pub mod cache;
pub mod client;

pub use cache::{RefreshStats, TransactionCache};
pub use client::{
    Budget, LedgerApi, LedgerError, MockLedger, SaveTransaction, TransactionsDelta,
    WireTransaction, YnabClient,
};

use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use adnoto_core::OrderHistory;
use adnoto_extract::{parse_message, OrderExtractor};
use adnoto_ledger::{LedgerApi, LedgerError, TransactionCache};
use adnoto_recon::{Annotator, MatchEngine};

use crate::mail::{MailError, MailSource, RawMessage};

/// The single logical flow driving extraction, matching and annotation.
/// All mutable state lives here and only one step ever runs at a time, so
/// no locking is needed anywhere.
pub struct Pipeline<M: MailSource, L: LedgerApi> {
    mailbox: M,
    ledger: L,
    extractor: OrderExtractor,
    engine: MatchEngine,
    annotator: Annotator,
    cache: TransactionCache,
    history: OrderHistory,
    backfill_messages: u32,
    seen_messages: u32,
}

impl<M: MailSource, L: LedgerApi> Pipeline<M, L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mailbox: M,
        ledger: L,
        extractor: OrderExtractor,
        engine: MatchEngine,
        annotator: Annotator,
        cache: TransactionCache,
        history: OrderHistory,
        backfill_messages: u32,
    ) -> Self {
        Pipeline {
            mailbox,
            ledger,
            extractor,
            engine,
            annotator,
            cache,
            history,
            backfill_messages,
            seen_messages: 0,
        }
    }

    /// One-time scan over the most recent mailbox messages, followed by a
    /// first reconciliation of whatever orders were found. A ledger failure
    /// skips the reconciliation, not the process.
    pub async fn backfill(&mut self) -> Result<(), MailError> {
        let total = self.mailbox.total_messages().await?;
        self.seen_messages = total;
        if total == 0 {
            info!("mailbox is empty, nothing to backfill");
            return Ok(());
        }

        let start = total
            .saturating_sub(self.backfill_messages.saturating_sub(1))
            .max(1);
        info!(start, end = total, "scanning mailbox backlog");
        let messages = self.mailbox.fetch_range(start, total).await?;
        let extracted = self.ingest(&messages);
        info!(orders = extracted, "mailbox backlog scan complete");

        if self.history.is_empty() {
            return Ok(());
        }
        let since = self.history.first().map(|order| order.date);
        if let Err(e) = self.reconcile(since).await {
            error!("ledger sync failed during backfill: {e}");
        }
        Ok(())
    }

    /// Handle one new-mail notification: fetch the new range, extract, and
    /// reconcile only if at least one new order appeared.
    pub async fn on_new_mail(&mut self, count: u32) {
        if count == 0 {
            return;
        }
        info!(count, "new mail");
        let start = self.seen_messages + 1;
        self.seen_messages += count;

        let messages = match self.mailbox.fetch_range(start, self.seen_messages).await {
            Ok(messages) => messages,
            Err(e) => {
                error!("failed to fetch new messages: {e}");
                return;
            }
        };

        let extracted = self.ingest(&messages);
        if extracted == 0 {
            info!("no new orders found");
            return;
        }
        if let Err(e) = self.reconcile(None).await {
            error!("ledger sync failed after new mail: {e}");
        }
    }

    /// Periodic pass to catch ledger-side changes. A failed cycle is logged
    /// and skipped.
    pub async fn sweep(&mut self) {
        if let Err(e) = self.reconcile(None).await {
            warn!("scheduled ledger sync failed, skipping cycle: {e}");
        }
    }

    /// Run until the shutdown signal flips. Each arm is awaited to
    /// completion before the next event is taken, so an in-flight step
    /// always finishes.
    pub async fn run(
        mut self,
        mut new_mail: mpsc::Receiver<u32>,
        mut shutdown: watch::Receiver<bool>,
        sync_interval: Duration,
    ) {
        let start = tokio::time::Instant::now() + sync_interval;
        let mut ticker = tokio::time::interval_at(start, sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }
                Some(count) = new_mail.recv() => self.on_new_mail(count).await,
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    /// Extract orders from raw messages into the history buffer. Unreadable
    /// or unrecognized messages are skipped, never fatal.
    fn ingest(&mut self, messages: &[RawMessage]) -> usize {
        let mut extracted = 0;
        for message in messages {
            let email = match parse_message(&message.bytes) {
                Ok(email) => email,
                Err(e) => {
                    warn!(seq = message.seq, "unreadable message: {e}");
                    continue;
                }
            };
            if let Some(order) = self.extractor.extract(&email) {
                let evicted = self.history.push(order);
                if evicted > 0 {
                    info!(evicted, capacity = self.history.capacity(), "trimmed order history");
                }
                extracted += 1;
            }
        }
        extracted
    }

    /// Refresh the cache, match, and write memos back.
    async fn reconcile(&mut self, since: Option<NaiveDate>) -> Result<(), LedgerError> {
        let stats = self.cache.refresh(&self.ledger, since).await?;
        info!(
            fetched = stats.fetched,
            cached = stats.cached,
            deleted = stats.deleted,
            total = self.cache.count(),
            "transaction cache refreshed"
        );

        let matches = self.engine.find_matches(&self.history, &self.cache);
        if matches.is_empty() {
            info!("no matches found");
            return Ok(());
        }

        let written = self
            .annotator
            .apply(&self.ledger, &matches, &self.history, &mut self.cache)
            .await?;
        info!(
            written,
            transactions = self.cache.count(),
            orders = self.history.len(),
            "annotated matched transactions"
        );
        Ok(())
    }

    #[cfg(test)]
    fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    #[cfg(test)]
    fn history(&self) -> &OrderHistory {
        &self.history
    }
}

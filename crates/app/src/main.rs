use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod mail;
mod pipeline;

use adnoto_core::OrderHistory;
use adnoto_extract::OrderExtractor;
use adnoto_ledger::{LedgerApi, TransactionCache, YnabClient};
use adnoto_recon::{Annotator, MatchEngine};

use config::Config;
use mail::Maildir;
use pipeline::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("configuration")?;

    info!("connecting to ledger");
    let ledger = YnabClient::new(&config.api_url, &config.ynab_token);
    let budgets = ledger.get_budgets().await.context("ledger connection failed")?;
    let budget = budgets
        .iter()
        .find(|b| b.id == config.budget_id)
        .with_context(|| {
            format!(
                "unknown budget id {}; it is the id in your budget's URL",
                config.budget_id
            )
        })?;
    info!(budget = %budget.name, "connected to ledger");

    let mut pipeline = Pipeline::new(
        Maildir::new(&config.maildir),
        ledger,
        OrderExtractor::new(config.signature.clone(), config.max_item_length),
        MatchEngine::new(config.date_tolerance_days, config.dollar_tolerance),
        Annotator::new(config.max_item_length),
        TransactionCache::new(&config.budget_id, config.signature.clone()),
        OrderHistory::new(config.max_orders),
        config.backfill_messages,
    );

    let (mail_tx, mail_rx) = mpsc::channel(64);
    let _watcher = mail::spawn_mail_watcher(&config.maildir, mail_tx)
        .context("failed to start mail watcher")?;
    info!(dir = %config.maildir.display(), "watching mail drop");

    pipeline.backfill().await.context("mailbox backfill failed")?;
    info!("listening for new mail");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(
        mail_rx,
        shutdown_rx,
        Duration::from_secs(config.sync_interval_secs),
    ));

    signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(config.shutdown_grace_secs), handle)
        .await
        .is_err()
    {
        warn!("pipeline did not stop within the grace period");
    }
    Ok(())
}

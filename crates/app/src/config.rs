use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use adnoto_core::MerchantSignature;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("Failed to read merchant rules {path}: {source}")]
    RulesIo { path: String, source: std::io::Error },
    #[error("Failed to parse merchant rules {path}: {source}")]
    RulesParse { path: String, source: toml::de::Error },
}

/// Runtime configuration, read from the environment. A `.env` file is
/// folded in by the caller before this runs.
#[derive(Debug, Clone)]
pub struct Config {
    pub ynab_token: String,
    pub budget_id: String,
    pub api_url: String,
    /// Directory of raw `.eml` files acting as the mailbox.
    pub maildir: PathBuf,
    pub date_tolerance_days: f64,
    pub dollar_tolerance: f64,
    pub max_item_length: usize,
    pub max_orders: usize,
    pub backfill_messages: u32,
    pub sync_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub signature: MerchantSignature,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let signature = match optional("MERCHANT_RULES_FILE") {
            Some(path) => load_signature(Path::new(&path))?,
            None => {
                let mut signature = MerchantSignature::default();
                if let Some(payee) = optional("MERCHANT_PAYEE") {
                    signature.payee_contains = payee;
                }
                signature
            }
        };

        Ok(Config {
            ynab_token: required("YNAB_TOKEN")?,
            budget_id: required("YNAB_BUDGET_ID")?,
            api_url: optional("YNAB_API_URL")
                .unwrap_or_else(|| "https://api.ynab.com/v1".to_string()),
            maildir: PathBuf::from(required("MAILDIR_PATH")?),
            date_tolerance_days: parsed("YNAB_ACCEPTABLE_DATE_DIFFERENCE", 4.0)?,
            dollar_tolerance: parsed("YNAB_ACCEPTABLE_DOLLAR_DIFFERENCE", 0.5)?,
            max_item_length: parsed("MAX_ITEM_LENGTH", 45)?,
            max_orders: parsed("MAX_ORDERS", 1000)?,
            backfill_messages: parsed("HISTORICAL_SEARCH_NUM_EMAILS", 100)?,
            sync_interval_secs: parsed("SYNC_INTERVAL_SECS", 60)?,
            shutdown_grace_secs: parsed("SHUTDOWN_GRACE_SECS", 10)?,
            signature,
        })
    }
}

/// Load a merchant signature override from a TOML rules file.
pub fn load_signature(path: &Path) -> Result<MerchantSignature, ConfigError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::RulesIo { path: display.clone(), source })?;
    MerchantSignature::from_toml(&content)
        .map_err(|source| ConfigError::RulesParse { path: display, source })
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

use serde::{Deserialize, Serialize};

/// How mail and ledger records belonging to the target merchant are
/// recognized, and which existing memos may be overwritten. Loadable from
/// TOML so another merchant can be targeted without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MerchantSignature {
    /// Substring an order-confirmation subject must contain.
    pub subject_contains: String,
    /// Subjects containing any of these are not purchases; shipment and
    /// cancellation notices reuse the order subject line.
    pub subject_excludes: Vec<String>,
    /// Optional substring the From header must contain (case-insensitive).
    pub sender_contains: Option<String>,
    /// Substring identifying the merchant in a ledger payee name
    /// (case-insensitive).
    pub payee_contains: String,
    /// Machine-written memos considered stale and safe to overwrite
    /// (case-insensitive substring match).
    pub placeholder_memos: Vec<String>,
}

impl Default for MerchantSignature {
    fn default() -> Self {
        MerchantSignature {
            subject_contains: "Your Amazon.com order".to_string(),
            subject_excludes: vec!["has shipped".to_string(), "has been canceled".to_string()],
            sender_contains: None,
            payee_contains: "amazon".to_string(),
            placeholder_memos: vec!["amazon order".to_string(), "imported".to_string()],
        }
    }
}

impl MerchantSignature {
    pub fn from_toml(toml_content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_content)
    }

    /// Whether this email is an order confirmation from the merchant.
    pub fn matches_email(&self, sender: &str, subject: &str) -> bool {
        if !subject.contains(&self.subject_contains) {
            return false;
        }
        if self.subject_excludes.iter().any(|ex| subject.contains(ex)) {
            return false;
        }
        if let Some(want) = &self.sender_contains {
            if !sender.to_lowercase().contains(&want.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Whether a ledger payee belongs to the merchant.
    pub fn matches_payee(&self, payee: &str) -> bool {
        payee.to_lowercase().contains(&self.payee_contains.to_lowercase())
    }

    /// Whether an existing memo may be replaced: empty, or recognized as a
    /// stale machine-written placeholder.
    pub fn memo_overwritable(&self, memo: &str) -> bool {
        if memo.trim().is_empty() {
            return true;
        }
        let memo = memo.to_lowercase();
        self.placeholder_memos.iter().any(|p| memo.contains(&p.to_lowercase()))
    }
}

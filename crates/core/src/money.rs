use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

/// Integer currency amount in milliunits: 1000 units = one major currency
/// unit. Negative amounts are debits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Milliunits(i64);

impl Milliunits {
    pub const ZERO: Milliunits = Milliunits(0);

    pub fn new(raw: i64) -> Self {
        Milliunits(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn abs(self) -> Self {
        Milliunits(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Neg for Milliunits {
    type Output = Self;
    fn neg(self) -> Self {
        Milliunits(-self.0)
    }
}

impl fmt::Display for Milliunits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dollars = Decimal::from(self.0) / Decimal::from(1000);
        if dollars.is_sign_negative() {
            write!(f, "-${:.2}", -dollars)
        } else {
            write!(f, "${:.2}", dollars)
        }
    }
}

/// Parse a currency display string ("$1,234.56", "52.30") into milliunits.
/// Goes through `Decimal` so cents survive exactly.
pub fn parse_currency(s: &str) -> Option<Milliunits> {
    let clean = s.trim().trim_start_matches('$').replace(',', "");
    let dec = Decimal::from_str(&clean).ok()?;
    (dec * Decimal::from(1000)).round().to_i64().map(Milliunits)
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Cents, MAX_FRACTION_DIGITS, format_minor};

/// The single currency the ledger is denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Currency {
    pub name: String,
    pub plural: String,
    pub symbol: String,
    /// Minor-unit precision: 2 means balances are stored in hundredths.
    pub fraction_digits: u32,
}

impl Default for Currency {
    fn default() -> Self {
        Self {
            name: "Coin".to_string(),
            plural: "Coins".to_string(),
            symbol: "$".to_string(),
            fraction_digits: 2,
        }
    }
}

impl Currency {
    /// Format minor units, e.g. `$12.34`.
    pub fn format(&self, amount: Cents) -> String {
        format!("{}{}", self.symbol, format_minor(amount, self.fraction_digits))
    }

    /// Convert a decimal amount into minor units.
    ///
    /// Returns `None` when the amount has more fraction digits than this
    /// currency allows or does not fit in an `i64`.
    pub fn to_minor(&self, amount: Decimal) -> Option<Cents> {
        if self.fraction_digits > MAX_FRACTION_DIGITS {
            return None;
        }
        let normalized = amount.normalize();
        if normalized.scale() > self.fraction_digits {
            return None;
        }
        let factor = Decimal::from(10i64.pow(self.fraction_digits));
        let scaled = normalized.checked_mul(factor)?;
        i64::try_from(scaled).ok()
    }

    /// Convert minor units back into a decimal with this currency's scale.
    pub fn to_decimal(&self, amount: Cents) -> Decimal {
        Decimal::new(amount, self.fraction_digits)
    }
}

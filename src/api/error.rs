use rust_decimal::Decimal;
use thiserror::Error;

use crate::application::LedgerError;
use crate::domain::Currency;

/// Error representation handed to economy API callers.
///
/// Amounts are expressed in the currency's decimal units; every internal
/// [`LedgerError`] kind maps to exactly one variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds in account {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: String,
        balance: Decimal,
        required: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(String),

    #[error("Balance of account {0} would overflow")]
    Overflow(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Account {account} is busy; gave up after {attempts} attempts")]
    ConcurrentModification { account: String, attempts: u32 },

    #[error("Transfer failed and could not be rolled back: {0}")]
    CompensationFailed(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

impl EconomyError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EconomyError::InvalidAmount(_) => "invalid_amount",
            EconomyError::InsufficientFunds { .. } => "insufficient_funds",
            EconomyError::AccountNotFound(_) => "account_not_found",
            EconomyError::SameAccount(_) => "same_account",
            EconomyError::Overflow(_) => "overflow",
            EconomyError::Cancelled(_) => "cancelled",
            EconomyError::ConcurrentModification { .. } => "concurrent_modification",
            EconomyError::CompensationFailed(_) => "compensation_failed",
            EconomyError::StorageUnavailable(_) => "storage_unavailable",
            EconomyError::UnknownCurrency(_) => "unknown_currency",
        }
    }

    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EconomyError::ConcurrentModification { .. } | EconomyError::StorageUnavailable(_)
        )
    }

    pub(crate) fn from_ledger(err: LedgerError, currency: &Currency) -> Self {
        match err {
            LedgerError::InvalidAmount(msg) => EconomyError::InvalidAmount(msg),
            LedgerError::InsufficientFunds {
                id,
                balance,
                required,
            } => EconomyError::InsufficientFunds {
                account: id.to_string(),
                balance: currency.to_decimal(balance),
                required: currency.to_decimal(required),
            },
            LedgerError::AccountNotFound(id) => EconomyError::AccountNotFound(id.to_string()),
            LedgerError::SameAccount(id) => EconomyError::SameAccount(id.to_string()),
            LedgerError::Overflow(id) => EconomyError::Overflow(id.to_string()),
            LedgerError::Cancelled(event) => EconomyError::Cancelled(event),
            LedgerError::ConcurrentModification { id, attempts } => {
                EconomyError::ConcurrentModification {
                    account: id.to_string(),
                    attempts,
                }
            }
            err @ LedgerError::CompensationFailed { .. } => {
                EconomyError::CompensationFailed(err.to_string())
            }
            LedgerError::StorageUnavailable(source) => {
                EconomyError::StorageUnavailable(format!("{:#}", source))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::domain::AccountId;

    #[test]
    fn test_insufficient_funds_uses_decimal_units() {
        let err = EconomyError::from_ledger(
            LedgerError::InsufficientFunds {
                id: AccountId::from("alice"),
                balance: 10_000,
                required: 15_000,
            },
            &Currency::default(),
        );
        assert_eq!(
            err,
            EconomyError::InsufficientFunds {
                account: "alice".to_string(),
                balance: Decimal::new(10_000, 2),
                required: Decimal::new(15_000, 2),
            }
        );
        assert_eq!(err.code(), "insufficient_funds");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_errors_keep_their_context() {
        let err = EconomyError::from_ledger(
            LedgerError::StorageUnavailable(anyhow!("disk full").context("Failed to update account")),
            &Currency::default(),
        );
        assert_eq!(err.code(), "storage_unavailable");
        assert!(err.to_string().contains("disk full"));
        assert!(err.is_retryable());
    }
}

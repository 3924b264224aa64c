use thiserror::Error;

use crate::domain::{AccountId, Cents};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds in account {id}: balance {balance}, required {required}")]
    InsufficientFunds {
        id: AccountId,
        balance: Cents,
        required: Cents,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    #[error("Balance of account {0} would overflow")]
    Overflow(AccountId),

    #[error("Cancelled by an event handler: {0}")]
    Cancelled(String),

    #[error("Account {id} was modified concurrently; gave up after {attempts} attempts")]
    ConcurrentModification { id: AccountId, attempts: u32 },

    #[error(
        "Transfer of {amount} from {from} to {to} failed and the debit could not be restored: {source}"
    )]
    CompensationFailed {
        from: AccountId,
        to: AccountId,
        amount: Cents,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("Storage unavailable: {0:#}")]
    StorageUnavailable(anyhow::Error),
}

/// Conflicts that reach this conversion were not retried, so they surface as
/// a single failed attempt.
impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { id, .. } => {
                LedgerError::ConcurrentModification { id, attempts: 1 }
            }
            StorageError::Unavailable(source) => LedgerError::StorageUnavailable(source),
        }
    }
}

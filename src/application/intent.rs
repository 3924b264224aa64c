use std::fmt;

use uuid::Uuid;

use super::LedgerError;
use crate::config::EconomyRules;
use crate::domain::{AccountId, Cents};

/// How a balance is about to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Credit(Cents),
    Debit(Cents),
    Set(Cents),
}

/// Why a balance is changing; used for events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Add,
    Subtract,
    Set,
    TransferDebit,
    TransferCredit,
    /// Re-credit of a transfer debit whose credit leg failed.
    Compensation,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Add => "add",
            Reason::Subtract => "subtract",
            Reason::Set => "set",
            Reason::TransferDebit => "transfer-debit",
            Reason::TransferCredit => "transfer-credit",
            Reason::Compensation => "transfer-compensate",
        }
    }

    /// Transfer legs are announced once as a transfer, not per leg.
    pub fn publishes_balance_change(&self) -> bool {
        matches!(self, Reason::Add | Reason::Subtract | Reason::Set)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending balance mutation. Never persisted; it is re-resolved against
/// the freshly loaded balance on every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub account: AccountId,
    pub change: Change,
    pub reason: Reason,
    pub request_id: Uuid,
}

impl Intent {
    pub fn new(account: &AccountId, change: Change, reason: Reason, request_id: Uuid) -> Self {
        Self {
            account: account.clone(),
            change,
            reason,
            request_id,
        }
    }

    /// Balance after applying this intent to `balance`, or the rule it breaks.
    pub fn resolve(&self, balance: Cents, rules: &EconomyRules) -> Result<Cents, LedgerError> {
        match self.change {
            Change::Credit(amount) => balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Overflow(self.account.clone())),
            Change::Debit(amount) => {
                let next = balance
                    .checked_sub(amount)
                    .ok_or_else(|| LedgerError::Overflow(self.account.clone()))?;
                if next < rules.floor && !rules.allow_overdraft {
                    return Err(LedgerError::InsufficientFunds {
                        id: self.account.clone(),
                        balance,
                        required: amount,
                    });
                }
                Ok(next)
            }
            Change::Set(amount) => {
                ensure_above_floor(amount, rules)?;
                Ok(amount)
            }
        }
    }
}

/// Reject a balance written as-is (set, restore) that breaks the floor.
pub fn ensure_above_floor(balance: Cents, rules: &EconomyRules) -> Result<(), LedgerError> {
    if balance < rules.floor && !rules.allow_overdraft {
        return Err(LedgerError::InvalidAmount(format!(
            "balance {} is below the floor {}",
            balance, rules.floor
        )));
    }
    Ok(())
}

/// Reject zero and negative amounts for add, subtract and transfer.
pub fn ensure_positive(amount: Cents) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(change: Change) -> Intent {
        Intent::new(&AccountId::from("alice"), change, Reason::Add, Uuid::new_v4())
    }

    #[test]
    fn test_debit_respects_floor() {
        let rules = EconomyRules::default();
        assert_eq!(intent(Change::Debit(40)).resolve(100, &rules).unwrap(), 60);
        assert_eq!(intent(Change::Debit(100)).resolve(100, &rules).unwrap(), 0);

        let err = intent(Change::Debit(150)).resolve(100, &rules).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                balance: 100,
                required: 150,
                ..
            }
        ));
    }

    #[test]
    fn test_debit_with_negative_floor_allows_credit_line() {
        let rules = EconomyRules {
            floor: -500,
            ..EconomyRules::default()
        };
        assert_eq!(intent(Change::Debit(300)).resolve(0, &rules).unwrap(), -300);
        assert!(intent(Change::Debit(501)).resolve(0, &rules).is_err());
    }

    #[test]
    fn test_overdraft_ignores_floor() {
        let rules = EconomyRules {
            allow_overdraft: true,
            ..EconomyRules::default()
        };
        assert_eq!(intent(Change::Debit(10)).resolve(0, &rules).unwrap(), -10);
        assert_eq!(intent(Change::Set(-7)).resolve(0, &rules).unwrap(), -7);
    }

    #[test]
    fn test_set_below_floor_is_invalid() {
        let rules = EconomyRules::default();
        assert!(matches!(
            intent(Change::Set(-1)).resolve(10, &rules),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(intent(Change::Set(0)).resolve(10, &rules).unwrap(), 0);
    }

    #[test]
    fn test_credit_overflow_is_reported() {
        let rules = EconomyRules::default();
        assert!(matches!(
            intent(Change::Credit(1)).resolve(i64::MAX, &rules),
            Err(LedgerError::Overflow(_))
        ));
    }

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive(1).is_ok());
        assert!(ensure_positive(0).is_err());
        assert!(ensure_positive(-5).is_err());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn change() -> impl Strategy<Value = Change> {
            prop_oneof![
                (1i64..10_000).prop_map(Change::Credit),
                (1i64..10_000).prop_map(Change::Debit),
                (-10_000i64..10_000).prop_map(Change::Set),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of changes is attempted, only the
            /// accepted ones are applied and the balance never ends below the floor.
            #[test]
            fn balance_never_breaches_floor(
                floor in -1_000i64..1_000,
                changes in prop::collection::vec(change(), 1..50)
            ) {
                let rules = EconomyRules { starting_balance: floor.max(0), floor, allow_overdraft: false };
                let mut balance = rules.starting_balance;
                for change in changes {
                    if let Ok(next) = intent(change).resolve(balance, &rules) {
                        balance = next;
                    }
                    prop_assert!(balance >= floor);
                }
            }

            /// Property: a credit followed by a debit of the same amount is a no-op.
            #[test]
            fn credit_then_debit_is_identity(start in 0i64..1_000_000, amount in 1i64..1_000_000) {
                let rules = EconomyRules::default();
                let credited = intent(Change::Credit(amount)).resolve(start, &rules).unwrap();
                let debited = intent(Change::Debit(amount)).resolve(credited, &rules).unwrap();
                prop_assert_eq!(debited, start);
            }
        }
    }

    #[test]
    fn test_only_direct_changes_publish_balance_events() {
        assert!(Reason::Add.publishes_balance_change());
        assert!(Reason::Set.publishes_balance_change());
        assert!(!Reason::TransferDebit.publishes_balance_change());
        assert!(!Reason::Compensation.publishes_balance_change());
    }
}

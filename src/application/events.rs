//! Cancellable economy events.
//!
//! Handlers run synchronously while the affected accounts are locked, so a
//! handler must not call back into the ledger for those same accounts.

use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::{AccountId, AccountRecord, Cents};

use super::Reason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EconomyEvent {
    /// An account is about to be created on first reference.
    AccountCreate { id: AccountId },
    /// An account is about to be removed.
    AccountDelete { account: AccountRecord },
    /// A single account's balance is about to change. Published once per
    /// change; a write retried after a conflict is not announced again.
    BalanceChange {
        id: AccountId,
        old_balance: Cents,
        new_balance: Cents,
        reason: Reason,
    },
    /// Funds are about to move between two accounts.
    BalanceTransfer {
        from: AccountId,
        to: AccountId,
        amount: Cents,
    },
}

impl EconomyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EconomyEvent::AccountCreate { .. } => "account-create",
            EconomyEvent::AccountDelete { .. } => "account-delete",
            EconomyEvent::BalanceChange { .. } => "balance-change",
            EconomyEvent::BalanceTransfer { .. } => "balance-transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Continue,
    Cancel,
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &EconomyEvent) -> EventOutcome;
}

impl<F> EventHandler for F
where
    F: Fn(&EconomyEvent) -> EventOutcome + Send + Sync,
{
    fn handle(&self, event: &EconomyEvent) -> EventOutcome {
        self(event)
    }
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Publish `event`; returns `false` as soon as a handler cancels it.
    pub fn call(&self, event: &EconomyEvent) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers
            .iter()
            .all(|handler| handler.handle(event) == EventOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn create_event() -> EconomyEvent {
        EconomyEvent::AccountCreate {
            id: AccountId::from("alice"),
        }
    }

    #[test]
    fn test_empty_bus_allows_everything() {
        assert!(EventBus::new().call(&create_event()));
    }

    #[test]
    fn test_cancel_stops_later_handlers() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        bus.register(Arc::new(move |_: &EconomyEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            EventOutcome::Cancel
        }));
        let counter = Arc::clone(&seen);
        bus.register(Arc::new(move |_: &EconomyEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            EventOutcome::Continue
        }));

        assert!(!bus.call(&create_event()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_can_filter_by_event() {
        let bus = EventBus::new();
        bus.register(Arc::new(|event: &EconomyEvent| match event {
            EconomyEvent::BalanceTransfer { amount, .. } if *amount > 1_000 => EventOutcome::Cancel,
            _ => EventOutcome::Continue,
        }));

        let small = EconomyEvent::BalanceTransfer {
            from: "a".into(),
            to: "b".into(),
            amount: 10,
        };
        let large = EconomyEvent::BalanceTransfer {
            from: "a".into(),
            to: "b".into(),
            amount: 5_000,
        };
        assert!(bus.call(&small));
        assert!(!bus.call(&large));
        assert!(bus.call(&create_event()));

        bus.clear();
        assert!(bus.call(&large));
    }
}

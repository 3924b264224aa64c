use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EconomyConfig, EconomyRules, RetryPolicy};
use crate::domain::{AccountId, AccountRecord, Cents};
use crate::storage::{Backend, StorageBackend};

use super::{
    AccountLocks, AccountRepository, Change, EconomyEvent, EventBus, Intent, LedgerError, Reason,
    ensure_above_floor, ensure_positive,
};

/// Application service owning every balance invariant.
/// This is the only way accounts are mutated; the API adapter, the CLI and
/// the import path all go through it.
pub struct LedgerService {
    repo: AccountRepository,
    locks: AccountLocks,
    events: EventBus,
    rules: EconomyRules,
    retry: RetryPolicy,
}

/// Result of a committed transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub from: AccountRecord,
    pub to: AccountRecord,
    pub amount: Cents,
    pub request_id: Uuid,
}

impl LedgerService {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        rules: EconomyRules,
        retry: RetryPolicy,
        cache_ttl: Option<std::time::Duration>,
    ) -> Self {
        Self {
            repo: AccountRepository::new(backend, cache_ttl),
            locks: AccountLocks::new(),
            events: EventBus::new(),
            rules,
            retry,
        }
    }

    pub fn from_config(backend: Arc<dyn StorageBackend>, config: &EconomyConfig) -> Self {
        Self::new(backend, config.economy, config.retry, config.cache.ttl())
    }

    /// Open the configured backend inside `data_dir` and build a service on it.
    pub async fn open(config: &EconomyConfig, data_dir: &Path) -> Result<Self, LedgerError> {
        let backend = Backend::open(&config.storage, data_dir).await?;
        Ok(Self::from_config(Arc::new(backend), config))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn rules(&self) -> &EconomyRules {
        &self.rules
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.repo.backend()
    }

    /// Load every stored account into the cache.
    pub async fn warm_cache(&self) -> Result<usize, LedgerError> {
        let count = self.repo.warm().await?;
        info!(accounts = count, "account cache warmed");
        Ok(count)
    }

    /// Flush and close the backend. The service must not be used afterwards.
    pub async fn shutdown(&self) -> Result<(), LedgerError> {
        self.backend().close().await?;
        info!(backend = %self.backend().kind(), "storage closed");
        Ok(())
    }

    // ========================
    // Reads
    // ========================

    /// Whether the account exists, without creating it.
    pub async fn has_account(&self, id: &AccountId) -> Result<bool, LedgerError> {
        Ok(self.repo.get(id).await?.is_some())
    }

    /// Current state of the account, creating it on first reference.
    pub async fn account(&self, id: &AccountId) -> Result<AccountRecord, LedgerError> {
        if let Some(record) = self.repo.get(id).await? {
            return Ok(record);
        }
        let _guard = self.locks.lock(id).await;
        self.load_or_create(id).await
    }

    pub async fn get_balance(&self, id: &AccountId) -> Result<Cents, LedgerError> {
        Ok(self.account(id).await?.balance)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, LedgerError> {
        Ok(self.repo.find_by_name(name).await?)
    }

    /// Every account, ordered by id.
    pub async fn accounts(&self) -> Result<Vec<AccountRecord>, LedgerError> {
        Ok(self.repo.all().await?)
    }

    /// Richest accounts first; equal balances are ordered by id.
    pub async fn top_accounts(&self, limit: usize) -> Result<Vec<AccountRecord>, LedgerError> {
        let mut accounts = self.repo.all().await?;
        accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.id.cmp(&b.id)));
        accounts.truncate(limit);
        Ok(accounts)
    }

    // ========================
    // Account lifecycle
    // ========================

    /// Make sure the account exists and, when `name` is given, carries it.
    /// Used when a player joins.
    pub async fn ensure_account(
        &self,
        id: &AccountId,
        name: Option<&str>,
    ) -> Result<AccountRecord, LedgerError> {
        let _guard = self.locks.lock(id).await;
        let record = match self.repo.get(id).await? {
            Some(record) => record,
            None => self.create(id, name).await?,
        };

        match name {
            Some(name) if record.name.as_deref() != Some(name) => {
                self.repo.rename(id, name).await?;
                debug!(account = %id, name, "account renamed");
                self.require(id).await
            }
            _ => Ok(record),
        }
    }

    /// Update the display name of an existing account.
    pub async fn rename_account(
        &self,
        id: &AccountId,
        name: &str,
    ) -> Result<AccountRecord, LedgerError> {
        let _guard = self.locks.lock(id).await;
        if !self.repo.rename(id, name).await? {
            return Err(LedgerError::AccountNotFound(id.clone()));
        }
        info!(account = %id, name, "account renamed");
        self.require(id).await
    }

    /// Remove the account. Returns `false` when it did not exist.
    pub async fn delete_account(&self, id: &AccountId) -> Result<bool, LedgerError> {
        let guard = self.locks.lock(id).await;
        let deleted = self
            .with_retry(id, "delete", |tries| self.try_delete(id, tries == 1))
            .await;
        drop(guard);
        self.locks.prune();

        if matches!(deleted, Ok(true)) {
            info!(account = %id, "account deleted");
        }
        deleted
    }

    /// Write an exported row back. Only rows newer than the stored one are
    /// applied, so versions never move backwards. The balance must respect
    /// the floor like any `set`.
    pub async fn restore_account(&self, record: &AccountRecord) -> Result<bool, LedgerError> {
        ensure_above_floor(record.balance, &self.rules)?;
        let _guard = self.locks.lock(&record.id).await;
        let written = self.repo.restore(record).await?;
        debug!(account = %record.id, version = record.version, written, "account restored");
        Ok(written)
    }

    // ========================
    // Balance operations
    // ========================

    pub async fn add(&self, id: &AccountId, amount: Cents) -> Result<AccountRecord, LedgerError> {
        ensure_positive(amount)?;
        let _guard = self.locks.lock(id).await;
        self.apply(&Intent::new(id, Change::Credit(amount), Reason::Add, Uuid::new_v4()))
            .await
    }

    pub async fn subtract(
        &self,
        id: &AccountId,
        amount: Cents,
    ) -> Result<AccountRecord, LedgerError> {
        ensure_positive(amount)?;
        let _guard = self.locks.lock(id).await;
        self.apply(&Intent::new(
            id,
            Change::Debit(amount),
            Reason::Subtract,
            Uuid::new_v4(),
        ))
        .await
    }

    /// Administrative overwrite of the balance.
    pub async fn set(&self, id: &AccountId, amount: Cents) -> Result<AccountRecord, LedgerError> {
        let _guard = self.locks.lock(id).await;
        self.apply(&Intent::new(id, Change::Set(amount), Reason::Set, Uuid::new_v4()))
            .await
    }

    /// Move `amount` from one account to another, all or nothing.
    ///
    /// Both accounts stay locked for the whole operation. The debit is
    /// committed first; if the credit cannot be committed the debit is
    /// credited back before the error is returned.
    pub async fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Cents,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_positive(amount)?;
        if from == to {
            return Err(LedgerError::SameAccount(from.clone()));
        }

        let request_id = Uuid::new_v4();
        let _guards = self.locks.lock_pair(from, to).await;
        self.load_or_create(from).await?;
        self.load_or_create(to).await?;

        let event = EconomyEvent::BalanceTransfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        };
        self.publish(&event)?;

        let debit = Intent::new(from, Change::Debit(amount), Reason::TransferDebit, request_id);
        let debited = self.apply(&debit).await?;

        let credit = Intent::new(to, Change::Credit(amount), Reason::TransferCredit, request_id);
        match self.apply(&credit).await {
            Ok(credited) => {
                info!(%request_id, from = %from, to = %to, amount, "transfer committed");
                Ok(TransferReceipt {
                    from: debited,
                    to: credited,
                    amount,
                    request_id,
                })
            }
            Err(err) => {
                warn!(%request_id, from = %from, to = %to, amount, error = %err, "transfer credit failed, compensating");
                let compensation =
                    Intent::new(from, Change::Credit(amount), Reason::Compensation, request_id);
                match self.apply(&compensation).await {
                    Ok(_) => Err(err),
                    Err(compensation_err) => {
                        error!(
                            %request_id,
                            from = %from,
                            to = %to,
                            amount,
                            credit_error = %err,
                            error = %compensation_err,
                            "transfer compensation failed"
                        );
                        Err(LedgerError::CompensationFailed {
                            from: from.clone(),
                            to: to.clone(),
                            amount,
                            source: Box::new(compensation_err),
                        })
                    }
                }
            }
        }
    }

    // ========================
    // Internals
    // ========================

    fn publish(&self, event: &EconomyEvent) -> Result<(), LedgerError> {
        if self.events.call(event) {
            Ok(())
        } else {
            debug!(event = event.name(), "event cancelled");
            Err(LedgerError::Cancelled(event.name().to_string()))
        }
    }

    async fn create(
        &self,
        id: &AccountId,
        name: Option<&str>,
    ) -> Result<AccountRecord, LedgerError> {
        self.publish(&EconomyEvent::AccountCreate { id: id.clone() })?;
        let record = self
            .repo
            .create_if_absent(id, name, self.rules.starting_balance)
            .await?;
        info!(account = %id, balance = record.balance, "account created");
        Ok(record)
    }

    /// Caller must hold the account lock.
    async fn load_or_create(&self, id: &AccountId) -> Result<AccountRecord, LedgerError> {
        match self.repo.get(id).await? {
            Some(record) => Ok(record),
            None => self.create(id, None).await,
        }
    }

    async fn require(&self, id: &AccountId) -> Result<AccountRecord, LedgerError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))
    }

    /// Run `attempt` until it stops reporting a version conflict, at most
    /// `retry.max_attempts` times. Each call gets its 1-based attempt number.
    async fn with_retry<T, F, Fut>(
        &self,
        id: &AccountId,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut tries = 1;
        loop {
            match attempt(tries).await {
                Err(LedgerError::ConcurrentModification { .. }) if tries < max_attempts => {
                    let delay = self.retry.backoff(tries);
                    warn!(account = %id, operation, attempt = tries, ?delay, "version conflict, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    tries += 1;
                }
                Err(LedgerError::ConcurrentModification { .. }) => {
                    warn!(account = %id, operation, attempts = tries, "giving up after repeated conflicts");
                    return Err(LedgerError::ConcurrentModification {
                        id: id.clone(),
                        attempts: tries,
                    });
                }
                other => return other,
            }
        }
    }

    /// Caller must hold the lock of `intent.account`.
    async fn apply(&self, intent: &Intent) -> Result<AccountRecord, LedgerError> {
        self.with_retry(&intent.account, intent.reason.as_str(), |tries| {
            self.try_apply(intent, tries == 1)
        })
        .await
    }

    /// Events are published only when `announce` is set, so a retried write
    /// is announced once.
    async fn try_apply(
        &self,
        intent: &Intent,
        announce: bool,
    ) -> Result<AccountRecord, LedgerError> {
        let current = self.load_or_create(&intent.account).await?;
        let balance = intent.resolve(current.balance, &self.rules)?;

        if announce && intent.reason.publishes_balance_change() {
            self.publish(&EconomyEvent::BalanceChange {
                id: intent.account.clone(),
                old_balance: current.balance,
                new_balance: balance,
                reason: intent.reason,
            })?;
        }

        let stored = self.repo.persist(&current, balance).await?;
        debug!(
            request_id = %intent.request_id,
            account = %intent.account,
            reason = %intent.reason,
            old_balance = current.balance,
            new_balance = stored.balance,
            version = stored.version,
            "balance committed"
        );
        Ok(stored)
    }

    async fn try_delete(&self, id: &AccountId, announce: bool) -> Result<bool, LedgerError> {
        let Some(current) = self.repo.get(id).await? else {
            return Ok(false);
        };
        if announce {
            self.publish(&EconomyEvent::AccountDelete {
                account: current.clone(),
            })?;
        }
        Ok(self.repo.delete(&current).await?)
    }
}

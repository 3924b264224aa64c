use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::application::{LedgerError, LedgerService};
use crate::domain::{AccountId, AccountRecord, Cents, Currency};

use super::EconomyError;

pub type EconomyResult<T> = Result<T, EconomyError>;

/// The economy surface other plugins talk to.
///
/// Cheap to clone; every clone shares the same ledger.
#[derive(Clone)]
pub struct EconomyApi {
    ledger: Arc<LedgerService>,
    currency: Arc<Currency>,
}

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: AccountId,
    pub name: String,
    pub balance: Decimal,
}

impl EconomyApi {
    pub fn new(ledger: Arc<LedgerService>, currency: Currency) -> Self {
        Self {
            ledger,
            currency: Arc::new(currency),
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerService> {
        &self.ledger
    }

    pub fn default_currency(&self) -> &Currency {
        &self.currency
    }

    /// Look a currency up by name, ignoring case.
    pub fn currency(&self, name: &str) -> Option<&Currency> {
        self.currency
            .name
            .eq_ignore_ascii_case(name)
            .then_some(&*self.currency)
    }

    pub fn currencies(&self) -> &[Currency] {
        std::slice::from_ref(&*self.currency)
    }

    pub async fn has_account(&self, id: &AccountId) -> EconomyResult<bool> {
        self.ledger.has_account(id).await.map_err(|e| self.translate(e))
    }

    pub async fn get_or_create_account(&self, id: &AccountId) -> EconomyResult<EconomyAccount> {
        let record = self.ledger.account(id).await.map_err(|e| self.translate(e))?;
        Ok(self.handle(record.id))
    }

    pub async fn accounts(&self) -> EconomyResult<Vec<EconomyAccount>> {
        let records = self.ledger.accounts().await.map_err(|e| self.translate(e))?;
        Ok(records.into_iter().map(|r| self.handle(r.id)).collect())
    }

    pub async fn delete_account(&self, id: &AccountId) -> EconomyResult<bool> {
        self.ledger
            .delete_account(id)
            .await
            .map_err(|e| self.translate(e))
    }

    pub async fn top_accounts(&self, limit: usize) -> EconomyResult<Vec<AccountSummary>> {
        let records = self
            .ledger
            .top_accounts(limit)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(records.iter().map(|r| self.summary(r)).collect())
    }

    /// Find an account by its display name, ignoring case.
    pub async fn account_by_name(&self, name: &str) -> EconomyResult<Option<EconomyAccount>> {
        let found = self
            .ledger
            .find_by_name(name)
            .await
            .map_err(|e| self.translate(e))?;
        Ok(found.map(|r| self.handle(r.id)))
    }

    /// Store the player's current name. Unknown accounts are left alone.
    pub async fn update_account_name(&self, id: &AccountId, name: &str) -> EconomyResult<bool> {
        match self.ledger.rename_account(id, name).await {
            Ok(_) => Ok(true),
            Err(LedgerError::AccountNotFound(_)) => Ok(false),
            Err(err) => Err(self.translate(err)),
        }
    }

    fn handle(&self, id: AccountId) -> EconomyAccount {
        EconomyAccount {
            id,
            api: self.clone(),
        }
    }

    fn summary(&self, record: &AccountRecord) -> AccountSummary {
        AccountSummary {
            id: record.id.clone(),
            name: record.display_name().to_string(),
            balance: self.currency.to_decimal(record.balance),
        }
    }

    fn translate(&self, err: LedgerError) -> EconomyError {
        EconomyError::from_ledger(err, &self.currency)
    }

    fn check_currency(&self, currency: &Currency) -> EconomyResult<()> {
        if currency.name.eq_ignore_ascii_case(&self.currency.name) {
            Ok(())
        } else {
            Err(EconomyError::UnknownCurrency(currency.name.clone()))
        }
    }

    fn to_minor(&self, amount: Decimal) -> EconomyResult<Cents> {
        self.currency.to_minor(amount).ok_or_else(|| {
            EconomyError::InvalidAmount(format!(
                "{} is not representable with {} fraction digits",
                amount, self.currency.fraction_digits
            ))
        })
    }
}

/// Handle to a single account. Holds no balance itself; every call reads
/// or writes through the ledger.
#[derive(Clone)]
pub struct EconomyAccount {
    id: AccountId,
    api: EconomyApi,
}

impl EconomyAccount {
    pub fn unique_id(&self) -> &AccountId {
        &self.id
    }

    /// Display name, or the id when no name is known.
    pub async fn name(&self) -> EconomyResult<String> {
        let record = self.record().await?;
        Ok(record.display_name().to_string())
    }

    pub async fn balance(&self, currency: &Currency) -> EconomyResult<Decimal> {
        self.api.check_currency(currency)?;
        let record = self.record().await?;
        Ok(self.api.currency.to_decimal(record.balance))
    }

    /// Balance per currency name.
    pub async fn balances(&self) -> EconomyResult<BTreeMap<String, Decimal>> {
        let record = self.record().await?;
        let mut balances = BTreeMap::new();
        balances.insert(
            self.api.currency.name.clone(),
            self.api.currency.to_decimal(record.balance),
        );
        Ok(balances)
    }

    /// Overwrite the balance; returns the stored balance.
    pub async fn set_balance(&self, currency: &Currency, amount: Decimal) -> EconomyResult<Decimal> {
        self.api.check_currency(currency)?;
        let amount = self.api.to_minor(amount)?;
        let record = self
            .api
            .ledger
            .set(&self.id, amount)
            .await
            .map_err(|e| self.api.translate(e))?;
        Ok(self.api.currency.to_decimal(record.balance))
    }

    /// Add `amount`; returns the new balance.
    pub async fn deposit(&self, currency: &Currency, amount: Decimal) -> EconomyResult<Decimal> {
        self.api.check_currency(currency)?;
        let amount = self.api.to_minor(amount)?;
        let record = self
            .api
            .ledger
            .add(&self.id, amount)
            .await
            .map_err(|e| self.api.translate(e))?;
        Ok(self.api.currency.to_decimal(record.balance))
    }

    /// Remove `amount`; returns the new balance.
    pub async fn withdraw(&self, currency: &Currency, amount: Decimal) -> EconomyResult<Decimal> {
        self.api.check_currency(currency)?;
        let amount = self.api.to_minor(amount)?;
        let record = self
            .api
            .ledger
            .subtract(&self.id, amount)
            .await
            .map_err(|e| self.api.translate(e))?;
        Ok(self.api.currency.to_decimal(record.balance))
    }

    pub async fn transfer(
        &self,
        to: &EconomyAccount,
        currency: &Currency,
        amount: Decimal,
    ) -> EconomyResult<()> {
        self.api.check_currency(currency)?;
        let amount = self.api.to_minor(amount)?;
        self.api
            .ledger
            .transfer(&self.id, &to.id, amount)
            .await
            .map_err(|e| self.api.translate(e))?;
        Ok(())
    }

    async fn record(&self) -> EconomyResult<AccountRecord> {
        self.api
            .ledger
            .account(&self.id)
            .await
            .map_err(|e| self.api.translate(e))
    }
}

impl std::fmt::Debug for EconomyAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EconomyAccount").field("id", &self.id).finish()
    }
}

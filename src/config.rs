//! Configuration management
//!
//! Settings live in `config.json` inside the plugin data folder:
//! ```json
//! {
//!   "storage": { "type": "sqlite", "poolSize": 4 },
//!   "currency": { "name": "Coin", "plural": "Coins", "symbol": "$", "fractionDigits": 2 },
//!   "economy": { "startingBalance": 0, "floor": 0, "allowOverdraft": false },
//!   "retry": { "maxAttempts": 8, "backoffMs": 5, "multiplier": 2 },
//!   "cache": { "ttlSecs": null }
//! }
//! ```
//! Amounts are in minor units of the configured currency.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Cents, Currency, MAX_FRACTION_DIGITS};
use crate::storage::BackendKind;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Environment variable that overrides `storage.type`
pub const STORAGE_ENV: &str = "ACONOMY_STORAGE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type", default)]
    pub kind: BackendKind,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    4
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            pool_size: default_pool_size(),
        }
    }
}

/// Balance rules applied by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EconomyRules {
    /// Balance given to an account the first time it is referenced.
    pub starting_balance: Cents,
    /// Lowest balance an operation may leave behind.
    pub floor: Cents,
    /// Let subtract/transfer/set go below `floor`.
    pub allow_overdraft: bool,
}

impl Default for EconomyRules {
    fn default() -> Self {
        Self {
            starting_balance: 0,
            floor: 0,
            allow_overdraft: false,
        }
    }
}

/// Bounded retry on optimistic-version conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; zero disables sleeping.
    pub backoff_ms: u64,
    /// Factor applied to the delay after each retry (1 = fixed backoff).
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_ms: 5,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, `max_attempts` times in total.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Reload cached accounts older than this; `None` keeps them until a
    /// version conflict invalidates them.
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomyConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub economy: EconomyRules,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl EconomyConfig {
    /// Load config from the data folder, writing the defaults when the file
    /// does not exist yet.
    ///
    /// The backend can be overridden with `ACONOMY_STORAGE` (for CI/testing).
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        } else {
            let config = Self::default();
            config.save(data_dir)?;
            info!(path = %path.display(), "created default configuration");
            config
        };

        if let Ok(value) = std::env::var(STORAGE_ENV) {
            config.storage.kind = value
                .parse::<BackendKind>()
                .with_context(|| format!("Invalid {} value", STORAGE_ENV))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Save config to the data folder
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(data_dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.currency.fraction_digits > MAX_FRACTION_DIGITS {
            bail!(
                "currency.fractionDigits must be at most {}",
                MAX_FRACTION_DIGITS
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.maxAttempts must be at least 1");
        }
        if self.storage.pool_size == 0 {
            bail!("storage.poolSize must be at least 1");
        }
        let rules = &self.economy;
        if !rules.allow_overdraft && rules.starting_balance < rules.floor {
            bail!(
                "economy.startingBalance ({}) is below economy.floor ({})",
                rules.starting_balance,
                rules.floor
            );
        }
        Ok(())
    }
}

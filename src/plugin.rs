//! Host lifecycle.
//!
//! The host calls [`PluginLifecycle::init`] before using the economy and
//! [`PluginLifecycle::shutdown`] when it stops; the ledger is only usable
//! in between.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::info;

use crate::api::EconomyApi;
use crate::application::LedgerService;
use crate::config::EconomyConfig;
use crate::domain::{AccountId, AccountRecord};

#[async_trait]
pub trait PluginLifecycle: Send + Sync {
    /// Open storage and make the economy available.
    async fn init(&mut self, config: EconomyConfig) -> Result<()>;

    /// Flush and close storage. Calling it twice is harmless.
    async fn shutdown(&mut self) -> Result<()>;
}

struct Running {
    config: EconomyConfig,
    ledger: Arc<LedgerService>,
    api: EconomyApi,
}

/// The economy plugin: owns the ledger for one data directory.
pub struct Aconomy {
    data_dir: PathBuf,
    running: Option<Running>,
}

impl Aconomy {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            running: None,
        }
    }

    /// Load `config.json` from `data_dir` and initialize.
    pub async fn start(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut plugin = Self::new(data_dir);
        let config = EconomyConfig::load(&plugin.data_dir)?;
        plugin.init(config).await?;
        Ok(plugin)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn running(&self) -> Result<&Running> {
        match &self.running {
            Some(running) => Ok(running),
            None => bail!("Aconomy is not initialized"),
        }
    }

    pub fn config(&self) -> Result<&EconomyConfig> {
        Ok(&self.running()?.config)
    }

    pub fn api(&self) -> Result<&EconomyApi> {
        Ok(&self.running()?.api)
    }

    pub fn ledger(&self) -> Result<&Arc<LedgerService>> {
        Ok(&self.running()?.ledger)
    }

    /// Make sure a joining player has an account carrying their current name.
    pub async fn on_player_join(&self, id: &AccountId, name: &str) -> Result<AccountRecord> {
        let record = self
            .ledger()?
            .ensure_account(id, Some(name))
            .await
            .with_context(|| format!("Failed to prepare account {} for {}", id, name))?;
        Ok(record)
    }
}

#[async_trait]
impl PluginLifecycle for Aconomy {
    async fn init(&mut self, config: EconomyConfig) -> Result<()> {
        if self.running.is_some() {
            bail!("Aconomy is already initialized");
        }
        config.validate()?;
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;

        let ledger = LedgerService::open(&config, &self.data_dir)
            .await
            .context("Failed to open economy storage")?;
        ledger.warm_cache().await?;

        let ledger = Arc::new(ledger);
        let api = EconomyApi::new(Arc::clone(&ledger), config.currency.clone());
        info!(
            backend = %config.storage.kind,
            currency = %config.currency.name,
            data_dir = %self.data_dir.display(),
            "economy enabled"
        );

        self.running = Some(Running {
            config,
            ledger,
            api,
        });
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running
            .ledger
            .shutdown()
            .await
            .context("Failed to close economy storage")?;
        info!("economy disabled");
        Ok(())
    }
}

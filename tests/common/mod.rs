// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aconomy::application::LedgerService;
use aconomy::config::{EconomyConfig, EconomyRules, RetryPolicy};
use aconomy::domain::{AccountId, AccountRecord, Cents, Version};
use aconomy::storage::{BackendKind, SqliteBackend, StorageBackend, StorageError};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tempfile::TempDir;

/// Every storage engine; backend-agnostic tests loop over this.
pub const BACKENDS: [BackendKind; 2] = [BackendKind::Sqlite, BackendKind::DuckDb];

/// Default configuration for `kind`, with fast retries
pub fn test_config(kind: BackendKind) -> EconomyConfig {
    let mut config = EconomyConfig::default();
    config.storage.kind = kind;
    config.retry = RetryPolicy {
        max_attempts: 20,
        backoff_ms: 1,
        multiplier: 1,
    };
    config
}

/// Helper to open a service over `dir` with the given config
pub async fn open_service(dir: &Path, config: &EconomyConfig) -> Result<LedgerService> {
    Ok(LedgerService::open(config, dir).await?)
}

/// Helper to create a test service with a temporary database
pub async fn test_service(kind: BackendKind) -> Result<(LedgerService, TempDir)> {
    test_service_with(kind, EconomyRules::default()).await
}

pub async fn test_service_with(
    kind: BackendKind,
    rules: EconomyRules,
) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let mut config = test_config(kind);
    config.economy = rules;
    let service = open_service(temp_dir.path(), &config).await?;
    Ok((service, temp_dir))
}

/// SQLite backend in `dir`, already migrated
pub async fn sqlite_backend(dir: &Path) -> Result<Arc<dyn StorageBackend>> {
    let backend = SqliteBackend::open(&dir.join("economy.db"), 4).await?;
    backend.migrate().await?;
    Ok(Arc::new(backend))
}

pub fn id(s: &str) -> AccountId {
    AccountId::from(s)
}

/// Backend wrapper that injects version conflicts and hard failures into
/// `store`, to exercise retry and compensation paths.
pub struct FlakyBackend {
    inner: Arc<dyn StorageBackend>,
    conflicts: AtomicU32,
    failing: Mutex<HashMap<AccountId, usize>>,
    stores: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(0),
            failing: Mutex::new(HashMap::new()),
            stores: AtomicUsize::new(0),
        }
    }

    /// The next `count` stores, on any account, report a version conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// Let `successes` more stores on `id` through, then fail every one after.
    pub fn fail_after(&self, id: &AccountId, successes: usize) {
        self.failing.lock().unwrap().insert(id.clone(), successes);
    }

    pub fn heal(&self) {
        self.conflicts.store(0, Ordering::SeqCst);
        self.failing.lock().unwrap().clear();
    }

    pub fn store_calls(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        self.inner.migrate().await
    }

    async fn load(&self, id: &AccountId) -> Result<Option<AccountRecord>, StorageError> {
        self.inner.load(id).await
    }

    async fn load_all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        self.inner.load_all().await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, StorageError> {
        self.inner.find_by_name(name).await
    }

    async fn create_if_absent(
        &self,
        id: &AccountId,
        name: Option<&str>,
        initial_balance: Cents,
    ) -> Result<AccountRecord, StorageError> {
        self.inner.create_if_absent(id, name, initial_balance).await
    }

    async fn store(
        &self,
        id: &AccountId,
        balance: Cents,
        expected_version: Version,
    ) -> Result<Version, StorageError> {
        self.stores.fetch_add(1, Ordering::SeqCst);

        let conflict = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            return Err(StorageError::Conflict {
                id: id.clone(),
                expected: expected_version,
            });
        }

        {
            let mut failing = self.failing.lock().unwrap();
            if let Some(left) = failing.get_mut(id) {
                if *left == 0 {
                    return Err(StorageError::Unavailable(anyhow!(
                        "injected failure for {}",
                        id
                    )));
                }
                *left -= 1;
            }
        }

        self.inner.store(id, balance, expected_version).await
    }

    async fn rename(&self, id: &AccountId, name: &str) -> Result<bool, StorageError> {
        self.inner.rename(id, name).await
    }

    async fn delete(
        &self,
        id: &AccountId,
        expected_version: Version,
    ) -> Result<bool, StorageError> {
        self.inner.delete(id, expected_version).await
    }

    async fn restore(&self, record: &AccountRecord) -> Result<bool, StorageError> {
        self.inner.restore(record).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}

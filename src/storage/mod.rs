//! Durable account storage.
//!
//! Every backend implements [`StorageBackend`] with identical transactional
//! semantics: balance writes are compare-and-swap on the row's `version`, so
//! a writer holding a stale version gets [`StorageError::Conflict`] instead of
//! silently overwriting a newer balance.

mod duckdb;
mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use self::duckdb::DuckDbBackend;
pub use self::sqlite::SqliteBackend;

use crate::config::StorageConfig;
use crate::domain::{AccountId, AccountRecord, Cents, Version};

/// SQL migration for the accounts table (portable between SQLite and DuckDB)
pub const MIGRATION_001_ACCOUNTS: &str = include_str!("migrations/001_accounts.sql");

#[derive(Error, Debug)]
pub enum StorageError {
    /// The stored version no longer matches the version the writer read.
    #[error("version conflict on account {id} (expected version {expected})")]
    Conflict { id: AccountId, expected: Version },

    #[error("storage unavailable: {0:#}")]
    Unavailable(#[from] anyhow::Error),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Which SQL engine backs the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-file SQLite database, single-writer.
    #[default]
    #[serde(alias = "file")]
    Sqlite,
    /// In-process DuckDB engine with a connection pool.
    #[serde(alias = "embedded")]
    DuckDb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::DuckDb => "duckdb",
        }
    }

    /// Database file name inside the data directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "economy.db",
            BackendKind::DuckDb => "economy.duckdb",
        }
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.file_name())
    }
}

/// A storage type name that matches no backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown storage type '{0}' (expected sqlite or duckdb)")]
pub struct UnknownBackendKind(pub String);

impl FromStr for BackendKind {
    type Err = UnknownBackendKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "file" => Ok(BackendKind::Sqlite),
            "duckdb" | "embedded" => Ok(BackendKind::DuckDb),
            _ => Err(UnknownBackendKind(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row store for account records.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create the schema if it does not exist yet.
    async fn migrate(&self) -> Result<(), StorageError>;

    async fn load(&self, id: &AccountId) -> Result<Option<AccountRecord>, StorageError>;

    /// Every stored account, ordered by id.
    async fn load_all(&self) -> Result<Vec<AccountRecord>, StorageError>;

    /// First account (by id) whose name matches, ignoring case.
    async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, StorageError>;

    /// Insert the account unless it exists; returns the stored row either way.
    async fn create_if_absent(
        &self,
        id: &AccountId,
        name: Option<&str>,
        initial_balance: Cents,
    ) -> Result<AccountRecord, StorageError>;

    /// Write `balance` if the row is still at `expected_version`.
    /// Returns the new version (`expected_version + 1`).
    async fn store(
        &self,
        id: &AccountId,
        balance: Cents,
        expected_version: Version,
    ) -> Result<Version, StorageError>;

    /// Update the display name. Does not touch the balance version.
    async fn rename(&self, id: &AccountId, name: &str) -> Result<bool, StorageError>;

    /// Remove the row if it is still at `expected_version`.
    /// Returns `false` when the row does not exist.
    async fn delete(&self, id: &AccountId, expected_version: Version)
    -> Result<bool, StorageError>;

    /// Insert `record`, or overwrite the stored row only when `record.version`
    /// is newer. Returns whether anything was written.
    async fn restore(&self, record: &AccountRecord) -> Result<bool, StorageError>;

    /// Flush and release connections.
    async fn close(&self) -> Result<(), StorageError>;
}

/// The configured backend, dispatched through [`StorageBackend`].
pub enum Backend {
    FileEmbedded(SqliteBackend),
    ProcessEmbedded(DuckDbBackend),
}

impl Backend {
    /// Open (creating if needed) the configured database inside `data_dir`
    /// and run the migration.
    pub async fn open(config: &StorageConfig, data_dir: &Path) -> Result<Self, StorageError> {
        let path = config.kind.database_path(data_dir);
        let backend = match config.kind {
            BackendKind::Sqlite => {
                Backend::FileEmbedded(SqliteBackend::open(&path, config.pool_size).await?)
            }
            BackendKind::DuckDb => {
                Backend::ProcessEmbedded(DuckDbBackend::open(&path, config.pool_size).await?)
            }
        };
        backend.migrate().await?;
        info!(backend = %config.kind, path = %path.display(), "storage opened");
        Ok(backend)
    }

    fn inner(&self) -> &dyn StorageBackend {
        match self {
            Backend::FileEmbedded(backend) => backend,
            Backend::ProcessEmbedded(backend) => backend,
        }
    }
}

#[async_trait]
impl StorageBackend for Backend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        self.inner().migrate().await
    }

    async fn load(&self, id: &AccountId) -> Result<Option<AccountRecord>, StorageError> {
        self.inner().load(id).await
    }

    async fn load_all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        self.inner().load_all().await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, StorageError> {
        self.inner().find_by_name(name).await
    }

    async fn create_if_absent(
        &self,
        id: &AccountId,
        name: Option<&str>,
        initial_balance: Cents,
    ) -> Result<AccountRecord, StorageError> {
        self.inner()
            .create_if_absent(id, name, initial_balance)
            .await
    }

    async fn store(
        &self,
        id: &AccountId,
        balance: Cents,
        expected_version: Version,
    ) -> Result<Version, StorageError> {
        self.inner().store(id, balance, expected_version).await
    }

    async fn rename(&self, id: &AccountId, name: &str) -> Result<bool, StorageError> {
        self.inner().rename(id, name).await
    }

    async fn delete(
        &self,
        id: &AccountId,
        expected_version: Version,
    ) -> Result<bool, StorageError> {
        self.inner().delete(id, expected_version).await
    }

    async fn restore(&self, record: &AccountRecord) -> Result<bool, StorageError> {
        self.inner().restore(record).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner().close().await
    }
}

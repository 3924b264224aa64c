use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use super::{BackendKind, MIGRATION_001_ACCOUNTS, StorageBackend, StorageError};
use crate::domain::{AccountId, AccountRecord, Cents, INITIAL_VERSION, Version};

/// How long a connection waits on SQLite's file lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File-embedded backend: one SQLite database file.
///
/// Reads go through the pool; every write first takes `write_gate`, so this
/// process never has two writers contending for the database file lock.
pub struct SqliteBackend {
    pool: SqlitePool,
    write_gate: Mutex<()>,
}

impl SqliteBackend {
    /// Create a backend over an existing SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Mutex::new(()),
        }
    }

    /// Open the database file at `path`, creating it and its parent directory
    /// if they do not exist.
    pub async fn open(path: &Path, pool_size: u32) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;

        Ok(Self::new(pool))
    }

    fn row_to_record(row: &SqliteRow) -> Result<AccountRecord, StorageError> {
        let updated_at_str: String = row.get("updated_at");

        Ok(AccountRecord {
            id: AccountId::new(row.get::<String, _>("id")),
            name: row.get("name"),
            balance: row.get("balance"),
            version: row.get("version"),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .context("Invalid updated_at timestamp")?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        sqlx::query(MIGRATION_001_ACCOUNTS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    async fn load(&self, id: &AccountId) -> Result<Option<AccountRecord>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, balance, version, updated_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn load_all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, name, balance, version, updated_at FROM accounts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, balance, version, updated_at
            FROM accounts
            WHERE lower(name) = lower(?)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by name")?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn create_if_absent(
        &self,
        id: &AccountId,
        name: Option<&str>,
        initial_balance: Cents,
    ) -> Result<AccountRecord, StorageError> {
        {
            let _gate = self.write_gate.lock().await;
            let result = sqlx::query(
                r#"
                INSERT INTO accounts (id, name, balance, version, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(id.as_str())
            .bind(name)
            .bind(initial_balance)
            .bind(INITIAL_VERSION)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to create account")?;

            if result.rows_affected() > 0 {
                debug!(account = %id, balance = initial_balance, "account row created");
            }
        }

        self.load(id)
            .await?
            .ok_or_else(|| anyhow!("Account {} missing right after insert", id).into())
    }

    async fn store(
        &self,
        id: &AccountId,
        balance: Cents,
        expected_version: Version,
    ) -> Result<Version, StorageError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(balance)
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_str())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .context("Failed to store balance")?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict {
                id: id.clone(),
                expected: expected_version,
            });
        }
        Ok(expected_version + 1)
    }

    async fn rename(&self, id: &AccountId, name: &str) -> Result<bool, StorageError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query("UPDATE accounts SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to rename account")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(
        &self,
        id: &AccountId,
        expected_version: Version,
    ) -> Result<bool, StorageError> {
        {
            let _gate = self.write_gate.lock().await;
            let result = sqlx::query("DELETE FROM accounts WHERE id = ? AND version = ?")
                .bind(id.as_str())
                .bind(expected_version)
                .execute(&self.pool)
                .await
                .context("Failed to delete account")?;
            if result.rows_affected() > 0 {
                return Ok(true);
            }
        }

        // Nothing deleted: either the row is gone or someone moved it on
        match self.load(id).await? {
            None => Ok(false),
            Some(_) => Err(StorageError::Conflict {
                id: id.clone(),
                expected: expected_version,
            }),
        }
    }

    async fn restore(&self, record: &AccountRecord) -> Result<bool, StorageError> {
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, name, balance, version, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                balance = excluded.balance,
                version = excluded.version,
                updated_at = excluded.updated_at
            WHERE excluded.version > accounts.version
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.name)
        .bind(record.balance)
        .bind(record.version)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to restore account")?;
        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

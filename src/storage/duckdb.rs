//! Process-embedded backend on DuckDB.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt, params};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::{BackendKind, MIGRATION_001_ACCOUNTS, StorageBackend, StorageError};
use crate::domain::{AccountId, AccountRecord, Cents, INITIAL_VERSION, Version};

/// Maximum number of attempts when the database file is locked
const MAX_OPEN_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const SELECT_COLUMNS: &str = "SELECT id, name, balance, version, updated_at FROM accounts";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_open_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("could not set lock on file")
        || lower.contains("database is locked")
}

/// DuckDB reports MVCC write-write collisions between connections as conflicts.
fn is_write_conflict(err: &duckdb::Error) -> bool {
    err.to_string().to_lowercase().contains("conflict")
}

fn is_duplicate_key(err: &duckdb::Error) -> bool {
    let lower = err.to_string().to_lowercase();
    lower.contains("duplicate key") || lower.contains("constraint")
}

type RawRow = (String, Option<String>, i64, i64, String);

fn read_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn raw_to_record(raw: RawRow) -> Result<AccountRecord, StorageError> {
    let (id, name, balance, version, updated_at) = raw;
    Ok(AccountRecord {
        id: AccountId::new(id),
        name,
        balance,
        version,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .context("Invalid updated_at timestamp")?
            .with_timezone(&Utc),
    })
}

fn load_one(conn: &Connection, id: &str) -> Result<Option<AccountRecord>, StorageError> {
    let raw = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?"), [id], read_raw)
        .optional()
        .context("Failed to fetch account")?;
    raw.map(raw_to_record).transpose()
}

/// Open the primary connection, retrying while another process holds the file.
fn open_primary(path: &Path) -> Result<Connection, StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut attempt = 0;
    loop {
        let config = duckdb::Config::default()
            .enable_autoload_extension(false)
            .context("Invalid DuckDB configuration")?;
        match Connection::open_with_flags(path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                let err_msg = e.to_string();
                attempt += 1;
                if is_retryable_open_error(&err_msg) && attempt < MAX_OPEN_RETRIES {
                    let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt - 1));
                    warn!(
                        path = %path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err_msg,
                        "DuckDB file busy, retrying"
                    );
                    thread::sleep(delay);
                    continue;
                }
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to open DuckDB database {}", path.display()))
                    .into());
            }
        }
    }
}

type Idle = Arc<Mutex<Vec<Connection>>>;

/// A connection checked out of the pool, together with its permit.
///
/// Dropping it puts the connection back before the permit is released, on
/// whatever thread that happens. A caller that stops waiting therefore never
/// takes the connection down with it.
struct PooledConnection {
    conn: Option<Connection>,
    idle: Idle,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(conn);
        }
    }
}

/// Process-embedded backend: one in-process DuckDB database shared by a small
/// pool of connections.
///
/// Each connection is its own MVCC session, so two pooled connections that
/// race on the same row get a DuckDB conflict, which surfaces as
/// [`StorageError::Conflict`].
pub struct DuckDbBackend {
    idle: Idle,
    permits: Arc<Semaphore>,
}

impl DuckDbBackend {
    /// Open (or create) the database at `path` with `pool_size` connections.
    pub async fn open(path: &Path, pool_size: u32) -> Result<Self, StorageError> {
        let owned = path.to_path_buf();
        let size = pool_size.max(1) as usize;

        let connections = tokio::task::spawn_blocking(move || {
            let primary = open_primary(&owned)?;
            let mut connections = Vec::with_capacity(size);
            for _ in 1..size {
                connections.push(
                    primary
                        .try_clone()
                        .context("Failed to clone DuckDB connection")?,
                );
            }
            connections.push(primary);
            Ok::<_, StorageError>(connections)
        })
        .await
        .context("DuckDB open task failed")??;

        Ok(Self {
            idle: Arc::new(Mutex::new(connections)),
            permits: Arc::new(Semaphore::new(size)),
        })
    }

    /// Check a connection out of the pool and run `f` on a blocking thread.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("DuckDB backend is closed")?;
        let conn = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| anyhow!("DuckDB connection pool is empty"))?;
        let pooled = PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        };

        tokio::task::spawn_blocking(move || match &pooled.conn {
            Some(conn) => f(conn),
            None => Err(anyhow!("DuckDB connection already returned").into()),
        })
        .await
        .context("DuckDB worker task failed")?
    }
}

#[async_trait]
impl StorageBackend for DuckDbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckDb
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute_batch(MIGRATION_001_ACCOUNTS)
                .context("Failed to run migration 001")?;
            Ok(())
        })
        .await
    }

    async fn load(&self, id: &AccountId) -> Result<Option<AccountRecord>, StorageError> {
        let id = id.as_str().to_string();
        self.with_connection(move |conn| load_one(conn, &id)).await
    }

    async fn load_all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))
                .context("Failed to prepare account listing")?;
            let rows = stmt
                .query_map([], read_raw)
                .context("Failed to list accounts")?
                .collect::<duckdb::Result<Vec<_>>>()
                .context("Failed to read account row")?;
            rows.into_iter().map(raw_to_record).collect()
        })
        .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, StorageError> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let raw = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE lower(name) = lower(?) ORDER BY id LIMIT 1"),
                    [&name],
                    read_raw,
                )
                .optional()
                .context("Failed to fetch account by name")?;
            raw.map(raw_to_record).transpose()
        })
        .await
    }

    async fn create_if_absent(
        &self,
        id: &AccountId,
        name: Option<&str>,
        initial_balance: Cents,
    ) -> Result<AccountRecord, StorageError> {
        let id = id.as_str().to_string();
        let name = name.map(str::to_string);
        self.with_connection(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO accounts (id, name, balance, version, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (id) DO NOTHING",
                params![
                    id,
                    name,
                    initial_balance,
                    INITIAL_VERSION,
                    Utc::now().to_rfc3339()
                ],
            );
            match inserted {
                Ok(n) if n > 0 => {
                    debug!(account = %id, balance = initial_balance, "account row created");
                }
                Ok(_) => {}
                // Another connection inserted the same id concurrently
                Err(e) if is_write_conflict(&e) || is_duplicate_key(&e) => {}
                Err(e) => return Err(anyhow::Error::new(e).context("Failed to create account").into()),
            }
            load_one(conn, &id)?
                .ok_or_else(|| anyhow!("Account {} missing right after insert", id).into())
        })
        .await
    }

    async fn store(
        &self,
        id: &AccountId,
        balance: Cents,
        expected_version: Version,
    ) -> Result<Version, StorageError> {
        let id = id.clone();
        self.with_connection(move |conn| {
            let updated = conn.execute(
                "UPDATE accounts
                 SET balance = ?, version = version + 1, updated_at = ?
                 WHERE id = ? AND version = ?",
                params![
                    balance,
                    Utc::now().to_rfc3339(),
                    id.as_str(),
                    expected_version
                ],
            );
            match updated {
                Ok(0) => Err(StorageError::Conflict {
                    id,
                    expected: expected_version,
                }),
                Ok(_) => Ok(expected_version + 1),
                Err(e) if is_write_conflict(&e) => Err(StorageError::Conflict {
                    id,
                    expected: expected_version,
                }),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to store balance").into()),
            }
        })
        .await
    }

    async fn rename(&self, id: &AccountId, name: &str) -> Result<bool, StorageError> {
        let id = id.as_str().to_string();
        let name = name.to_string();
        self.with_connection(move |conn| {
            let updated = conn
                .execute("UPDATE accounts SET name = ? WHERE id = ?", params![name, id])
                .context("Failed to rename account")?;
            Ok(updated > 0)
        })
        .await
    }

    async fn delete(
        &self,
        id: &AccountId,
        expected_version: Version,
    ) -> Result<bool, StorageError> {
        let id = id.clone();
        self.with_connection(move |conn| {
            let deleted = match conn.execute(
                "DELETE FROM accounts WHERE id = ? AND version = ?",
                params![id.as_str(), expected_version],
            ) {
                Ok(n) => n,
                Err(e) if is_write_conflict(&e) => 0,
                Err(e) => {
                    return Err(anyhow::Error::new(e).context("Failed to delete account").into());
                }
            };
            if deleted > 0 {
                return Ok(true);
            }
            match load_one(conn, id.as_str())? {
                None => Ok(false),
                Some(_) => Err(StorageError::Conflict {
                    id,
                    expected: expected_version,
                }),
            }
        })
        .await
    }

    async fn restore(&self, record: &AccountRecord) -> Result<bool, StorageError> {
        let record = record.clone();
        self.with_connection(move |conn| {
            let written = conn
                .execute(
                    "INSERT INTO accounts (id, name, balance, version, updated_at)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT (id) DO UPDATE SET
                         name = EXCLUDED.name,
                         balance = EXCLUDED.balance,
                         version = EXCLUDED.version,
                         updated_at = EXCLUDED.updated_at
                     WHERE EXCLUDED.version > accounts.version",
                    params![
                        record.id.as_str(),
                        record.name,
                        record.balance,
                        record.version,
                        record.updated_at.to_rfc3339()
                    ],
                )
                .context("Failed to restore account")?;
            Ok(written > 0)
        })
        .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let connections: Vec<Connection> = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            idle.drain(..).collect()
        };
        self.permits.close();

        tokio::task::spawn_blocking(move || {
            if let Some(conn) = connections.first() {
                if let Err(e) = conn.execute_batch("CHECKPOINT") {
                    warn!(error = %e, "DuckDB checkpoint before close failed");
                }
            }
            for conn in connections {
                if let Err((_, e)) = conn.close() {
                    warn!(error = %e, "failed to close DuckDB connection");
                }
            }
        })
        .await
        .context("DuckDB close task failed")?;
        Ok(())
    }
}

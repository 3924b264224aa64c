use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::{AccountId, AccountRecord, Cents};
use crate::storage::{StorageBackend, StorageError};

struct CacheEntry {
    record: AccountRecord,
    loaded_at: Instant,
}

impl CacheEntry {
    fn new(record: AccountRecord) -> Self {
        Self {
            record,
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        ttl.is_none_or(|ttl| self.loaded_at.elapsed() < ttl)
    }
}

/// Read-through, write-through cache of account rows.
///
/// The cache never decides a balance on its own: every write goes to the
/// backend with the cached version as the expected version, and a conflict
/// drops the entry so the next read sees what is actually stored.
pub struct AccountRepository {
    backend: Arc<dyn StorageBackend>,
    cache: RwLock<HashMap<AccountId, CacheEntry>>,
    ttl: Option<Duration>,
}

impl AccountRepository {
    pub fn new(backend: Arc<dyn StorageBackend>, ttl: Option<Duration>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn cached(&self, id: &AccountId) -> Option<AccountRecord> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(id)?;
        if !entry.is_fresh(self.ttl) {
            cache.remove(id);
            return None;
        }
        Some(entry.record.clone())
    }

    /// Cache `record` unless a newer version of it is already cached.
    fn put(&self, record: AccountRecord) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        match cache.get(&record.id) {
            Some(existing) if existing.record.version > record.version => {}
            _ => {
                cache.insert(record.id.clone(), CacheEntry::new(record));
            }
        }
    }

    pub fn invalidate(&self, id: &AccountId) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn get(&self, id: &AccountId) -> Result<Option<AccountRecord>, StorageError> {
        if let Some(record) = self.cached(id) {
            return Ok(Some(record));
        }
        self.reload(id).await
    }

    /// Bypass the cache and read the stored row.
    pub async fn reload(&self, id: &AccountId) -> Result<Option<AccountRecord>, StorageError> {
        match self.backend.load(id).await? {
            Some(record) => {
                self.put(record.clone());
                Ok(Some(record))
            }
            None => {
                self.invalidate(id);
                Ok(None)
            }
        }
    }

    pub async fn create_if_absent(
        &self,
        id: &AccountId,
        name: Option<&str>,
        initial_balance: Cents,
    ) -> Result<AccountRecord, StorageError> {
        let record = self
            .backend
            .create_if_absent(id, name, initial_balance)
            .await?;
        self.put(record.clone());
        Ok(record)
    }

    /// Write `new_balance` over `current`, guarded by `current.version`.
    pub async fn persist(
        &self,
        current: &AccountRecord,
        new_balance: Cents,
    ) -> Result<AccountRecord, StorageError> {
        match self
            .backend
            .store(&current.id, new_balance, current.version)
            .await
        {
            Ok(version) => {
                let record = current.with_balance(new_balance, version);
                self.put(record.clone());
                Ok(record)
            }
            Err(err) => {
                if err.is_conflict() {
                    debug!(account = %current.id, version = current.version, "stale cache entry dropped");
                }
                self.invalidate(&current.id);
                Err(err)
            }
        }
    }

    pub async fn rename(&self, id: &AccountId, name: &str) -> Result<bool, StorageError> {
        let renamed = self.backend.rename(id, name).await?;
        // The version is unchanged by a rename, so refresh instead of patching.
        self.invalidate(id);
        Ok(renamed)
    }

    pub async fn delete(&self, current: &AccountRecord) -> Result<bool, StorageError> {
        let result = self.backend.delete(&current.id, current.version).await;
        self.invalidate(&current.id);
        result
    }

    pub async fn restore(&self, record: &AccountRecord) -> Result<bool, StorageError> {
        let written = self.backend.restore(record).await?;
        self.invalidate(&record.id);
        Ok(written)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<AccountRecord>, StorageError> {
        let found = self.backend.find_by_name(name).await?;
        if let Some(record) = &found {
            self.put(record.clone());
        }
        Ok(found)
    }

    /// Every stored account, ordered by id. Refreshes the cache as a side effect.
    pub async fn all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        let records = self.backend.load_all().await?;
        for record in &records {
            self.put(record.clone());
        }
        Ok(records)
    }

    /// Load every stored account into the cache.
    pub async fn warm(&self) -> Result<usize, StorageError> {
        Ok(self.all().await?.len())
    }
}

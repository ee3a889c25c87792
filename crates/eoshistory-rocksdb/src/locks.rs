//! RocksDB-backed `LockStore`.
//!
//! RocksDB allows a single writer process per database, so a process-local
//! mutex around read-compare-write is enough to make swaps atomic.

use async_trait::async_trait;
use rocksdb::DB;
use std::sync::{Arc, Mutex};

use eoshistory_sync::{LockRecord, LockStore, SyncError, SyncResult};

use crate::keys::{lock_key, LOCK_PREFIX};

#[derive(Clone)]
pub struct RocksLockStore {
    db: Arc<DB>,
    cas: Arc<Mutex<()>>,
}

impl RocksLockStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            cas: Arc::new(Mutex::new(())),
        }
    }

    fn read(&self, name: &str) -> SyncResult<Option<LockRecord>> {
        match self.db.get(lock_key(name)) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SyncError::Serialization(format!("Invalid lock row {}: {}", name, e))),
            Ok(None) => Ok(None),
            Err(e) => Err(SyncError::Storage(format!("Database error: {}", e))),
        }
    }
}

#[async_trait]
impl LockStore for RocksLockStore {
    async fn get_lock(&self, name: &str) -> SyncResult<Option<LockRecord>> {
        self.read(name)
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&LockRecord>,
        new: Option<LockRecord>,
    ) -> SyncResult<bool> {
        let _guard = self
            .cas
            .lock()
            .map_err(|e| SyncError::Storage(format!("Lock table mutex poisoned: {}", e)))?;
        if self.read(name)?.as_ref() != expected {
            return Ok(false);
        }
        let result = match new {
            Some(record) => {
                let bytes = serde_json::to_vec(&record)?;
                self.db.put(lock_key(name), bytes)
            }
            None => self.db.delete(lock_key(name)),
        };
        result.map_err(|e| SyncError::Storage(format!("Failed to write lock {}: {}", name, e)))?;
        Ok(true)
    }

    async fn list_locks(&self) -> SyncResult<Vec<LockRecord>> {
        let mut locks = Vec::new();
        for item in self
            .db
            .iterator(rocksdb::IteratorMode::From(LOCK_PREFIX, rocksdb::Direction::Forward))
        {
            let (key, value) =
                item.map_err(|e| SyncError::Storage(format!("Failed to iterate keys: {}", e)))?;
            if !key.starts_with(LOCK_PREFIX) {
                break;
            }
            locks.push(serde_json::from_slice(&value)?);
        }
        Ok(locks)
    }

    async fn delete_lock(&self, name: &str) -> SyncResult<bool> {
        let _guard = self
            .cas
            .lock()
            .map_err(|e| SyncError::Storage(format!("Lock table mutex poisoned: {}", e)))?;
        let existed = self.read(name)?.is_some();
        if existed {
            self.db
                .delete(lock_key(name))
                .map_err(|e| SyncError::Storage(format!("Failed to delete lock {}: {}", name, e)))?;
        }
        Ok(existed)
    }
}

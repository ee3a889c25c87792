//! Distributed lock built on an atomic compare-and-swap over [`LockStore`] rows.
//!
//! A row whose `locked_until` has passed is treated as abandoned and can be
//! taken over by anyone. Every acquisition writes a fresh random token, so a
//! holder whose row was reclaimed can detect it on renew and release.

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::{LockRecord, LockStore, SyncError, SyncResult};

/// Session lock held by the orchestrator for a whole run.
pub fn sync_lock_name(queue: &str, owner: &str) -> String {
    format!("eoshist_sync:{}:{}", queue, owner)
}

/// Lock held while filling gaps.
pub fn gaps_lock_name(queue: &str, owner: &str) -> String {
    format!("eoshist_gaps:{}:{}", queue, owner)
}

/// Short-lived lock taken around a single block import.
pub fn import_lock_name(block_number: u64) -> String {
    format!("eoshist_impblock:{}", block_number)
}

/// `user@host` of the current process, used as the lock holder.
pub fn default_lock_holder() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{}", user, host)
}

fn default_lock_process() -> String {
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "eoshistory".to_string());
    format!("{} (pid {})", program, std::process::id())
}

fn ttl_delta(ttl: Duration) -> SyncResult<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| SyncError::Config(format!("Lock TTL out of range: {}", e)))
}

/// Acquires and administers named locks.
pub struct LockManager<L> {
    store: Arc<L>,
    holder: String,
    process: String,
}

impl<L> Clone for LockManager<L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            holder: self.holder.clone(),
            process: self.process.clone(),
        }
    }
}

impl<L: LockStore + 'static> LockManager<L> {
    pub fn new(store: Arc<L>) -> Self {
        Self::with_identity(store, default_lock_holder(), default_lock_process())
    }

    pub fn with_identity(store: Arc<L>, holder: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            store,
            holder: holder.into(),
            process: process.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn store(&self) -> &Arc<L> {
        &self.store
    }

    /// Take `name` for `ttl`. Fails with [`SyncError::LockContention`] if a
    /// live row exists or another caller wins the race.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> SyncResult<LockGuard<L>> {
        let now = Utc::now();
        let current = self.store.get_lock(name).await?;
        if let Some(existing) = &current {
            if !existing.is_expired(now) {
                return Err(SyncError::LockContention(name.to_string()));
            }
            warn!(
                "Reclaiming expired lock {} (expired at {})",
                existing, existing.locked_until
            );
        }

        let record = LockRecord {
            name: name.to_string(),
            locked_by: self.holder.clone(),
            lock_process: self.process.clone(),
            token: rand::random(),
            locked_until: now + ttl_delta(ttl)?,
            created_at: now,
        };
        if !self
            .store
            .compare_and_swap(name, current.as_ref(), Some(record.clone()))
            .await?
        {
            return Err(SyncError::LockContention(name.to_string()));
        }

        debug!("Acquired lock {}", record);
        Ok(LockGuard {
            store: self.store.clone(),
            record,
            released: false,
        })
    }

    /// Force-release a lock regardless of holder.
    pub async fn unlock(&self, name: &str) -> SyncResult<bool> {
        let removed = self.store.delete_lock(name).await?;
        if removed {
            info!("Released lock {}", name);
        }
        Ok(removed)
    }

    /// Remove expired rows, returning how many were purged.
    pub async fn clean(&self) -> SyncResult<usize> {
        let now = Utc::now();
        let mut purged = 0;
        for record in self.store.list_locks().await? {
            if record.is_expired(now)
                && self
                    .store
                    .compare_and_swap(&record.name, Some(&record), None)
                    .await?
            {
                debug!("Purged expired lock {}", record);
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub async fn list(&self) -> SyncResult<Vec<LockRecord>> {
        let mut locks = self.store.list_locks().await?;
        locks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(locks)
    }

    /// Delete every lock row.
    pub async fn clear_all(&self) -> SyncResult<usize> {
        let mut removed = 0;
        for record in self.store.list_locks().await? {
            if self.store.delete_lock(&record.name).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// A held lock. Released on [`LockGuard::release`], or in the background
/// when dropped inside a tokio runtime.
pub struct LockGuard<L: LockStore + 'static> {
    store: Arc<L>,
    record: LockRecord,
    released: bool,
}

impl<L: LockStore + 'static> LockGuard<L> {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Push the expiry out. With `extend` the TTL is added to the current
    /// expiry, otherwise expiry becomes now + `ttl`. A row that vanished or
    /// expired unclaimed is recreated; a row taken by someone else is an error.
    pub async fn renew(&mut self, ttl: Duration, extend: bool) -> SyncResult<()> {
        let now = Utc::now();
        let delta = ttl_delta(ttl)?;
        let current = self.store.get_lock(&self.record.name).await?;
        let base = match &current {
            Some(row) if row.token == self.record.token => {
                if extend {
                    row.locked_until
                } else {
                    now
                }
            }
            Some(row) if !row.is_expired(now) => {
                return Err(SyncError::LockContention(self.record.name.clone()));
            }
            _ => now,
        };

        let mut renewed = self.record.clone();
        renewed.locked_until = base + delta;
        if !self
            .store
            .compare_and_swap(&self.record.name, current.as_ref(), Some(renewed.clone()))
            .await?
        {
            return Err(SyncError::LockContention(self.record.name.clone()));
        }
        debug!("Renewed lock {} until {}", renewed.name, renewed.locked_until);
        self.record = renewed;
        Ok(())
    }

    /// Release the lock if this guard still owns it.
    pub async fn release(mut self) -> SyncResult<()> {
        self.released = true;
        release_record(self.store.as_ref(), &self.record).await
    }
}

async fn release_record<L: LockStore + ?Sized>(store: &L, record: &LockRecord) -> SyncResult<()> {
    match store.get_lock(&record.name).await? {
        Some(row) if row.token == record.token => {
            if store.compare_and_swap(&record.name, Some(&row), None).await? {
                debug!("Released lock {}", record.name);
            }
        }
        _ => debug!("Lock {} no longer held, nothing to release", record.name),
    }
    Ok(())
}

impl<L: LockStore + 'static> Drop for LockGuard<L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Lock {} dropped outside a runtime, left to expire", self.record.name);
            return;
        };
        let store = self.store.clone();
        let record = self.record.clone();
        handle.spawn(async move {
            if let Err(e) = release_record(store.as_ref(), &record).await {
                warn!("Failed to release lock {}: {}", record.name, e);
            }
        });
    }
}

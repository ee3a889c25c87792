//! Distributed lock semantics across independent holders.

use super::*;
use anyhow::Result;
use eoshistory_rocksdb::{open_database, RocksLockStore};
use eoshistory_sync::{LockStore, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn race_for_lock<L: LockStore + 'static>(store: Arc<L>, contenders: usize) -> Result<usize> {
    let mut handles = Vec::new();
    for i in 0..contenders {
        let manager = LockManager::with_identity(store.clone(), format!("holder{}@test", i), "pid");
        handles.push(tokio::spawn(async move {
            match manager.acquire("eoshist_sync:celery:race", Duration::from_secs(60)).await {
                Ok(guard) => {
                    // Keep the lock for the rest of the race
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    drop(guard);
                    true
                }
                Err(SyncError::LockContention(_)) => false,
                Err(e) => panic!("unexpected lock error: {}", e),
            }
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await? {
            winners += 1;
        }
    }
    Ok(winners)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_contender_wins_in_memory() -> Result<()> {
    init_logging();
    let store = Arc::new(eoshistory_sync::mock::MemoryLockStore::new());
    assert_eq!(race_for_lock(store, 16).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_contender_wins_in_rocksdb() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let store = Arc::new(RocksLockStore::new(open_database(dir.path())?));
    assert_eq!(race_for_lock(store, 16).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_expired_lock_is_taken_over_and_old_holder_notices() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let store = Arc::new(RocksLockStore::new(open_database(dir.path())?));
    let crashed = LockManager::with_identity(store.clone(), "old@test", "pid 1");
    let fresh = LockManager::with_identity(store.clone(), "new@test", "pid 2");

    let mut stale = crashed
        .acquire("eoshist_gaps:celery:e2e", Duration::from_millis(20))
        .await?;
    assert!(fresh.acquire("eoshist_gaps:celery:e2e", Duration::from_secs(60)).await.is_err());

    tokio::time::sleep(Duration::from_millis(40)).await;
    let taken = fresh.acquire("eoshist_gaps:celery:e2e", Duration::from_secs(60)).await?;
    assert_eq!(taken.record().locked_by, "new@test");

    // The previous holder can neither renew nor release the new row
    let err = stale.renew(Duration::from_secs(60), false).await.unwrap_err();
    assert!(matches!(err, SyncError::LockContention(_)));
    stale.release().await?;
    let row = store.get_lock("eoshist_gaps:celery:e2e").await?.unwrap();
    assert_eq!(row.locked_by, "new@test");

    taken.release().await?;
    assert!(store.get_lock("eoshist_gaps:celery:e2e").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_renew_extends_expiry() -> Result<()> {
    let locks = memory_locks("renew@test");
    let mut guard = locks.acquire("eoshist_sync:celery:renew", Duration::from_secs(10)).await?;
    let first = guard.record().locked_until;

    guard.renew(Duration::from_secs(10), true).await?;
    let extended = guard.record().locked_until;
    assert_eq!((extended - first).num_seconds(), 10);

    guard.renew(Duration::from_secs(1), false).await?;
    assert!(guard.record().locked_until < extended);
    guard.release().await?;
    assert!(locks.list().await?.is_empty());
    Ok(())
}

//! The pipeline and admin commands on a real RocksDB database.

use super::*;
use anyhow::Result;
use eoshistory::commands::{self, DeleteTarget};
use eoshistory_rocksdb::{open_database, RocksHistoryStore, RocksLockStore};
use eoshistory_sync::{find_stored_gaps, BlockImporter, HistoryStore, HistorySync, SyncState, TaskQueue};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_sync_into_rocksdb() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let db = open_database(dir.path())?;
    let node = Arc::new(chain_with(1..=30, 2, 3));
    let store = Arc::new(RocksHistoryStore::new(db.clone()));
    let locks = LockManager::with_identity(Arc::new(RocksLockStore::new(db)), "rocks@test", "pid 1");
    let listener = Arc::new(RecordingListener::default());

    let queue = Arc::new(TaskQueue::start(
        fast_queue_config("celery"),
        BlockImporter::new(node.clone(), store.clone()),
        locks.clone(),
        listener.clone(),
    ));
    let mut sync = HistorySync::new(
        node.clone(),
        store.clone(),
        queue.clone(),
        locks.clone(),
        SyncConfig {
            start_block: Some(1),
            ..fast_sync_config()
        },
    );
    let report = sync.run().await?;
    queue.shutdown().await;

    assert_eq!(report.state, SyncState::Done);
    let stats = store.stats().await?;
    assert_eq!(stats.blocks, 29);
    assert_eq!(stats.transactions, 58);
    assert_eq!(stats.actions, 174);
    assert_eq!(stats.highest_block, Some(29));
    assert!(find_stored_gaps(store.as_ref(), true).await?.is_empty());
    assert!(listener.failed.lock().unwrap().is_empty());
    assert!(locks.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_admin_commands_on_rocksdb() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let db = open_database(dir.path())?;
    let node = Arc::new(chain_with(1..=12, 1, 2));
    let store = Arc::new(RocksHistoryStore::new(db.clone()));
    let locks = LockManager::with_identity(Arc::new(RocksLockStore::new(db)), "admin@test", "pid 1");
    let importer = BlockImporter::new(node, store.clone());
    let config = fast_queue_config("import");

    let blocks: Vec<u64> = (1..=12).collect();
    let mut out = Vec::new();
    assert_eq!(commands::import_blocks(&importer, &locks, &config, &blocks, false, &mut out).await?, 12);

    let target = DeleteTarget::from_args(vec![], Some(4), Some(6))?;
    let removed = commands::delete_blocks(store.as_ref(), &target, &mut out).await?;
    assert_eq!(removed.blocks, 3);
    assert_eq!(removed.actions, 6);

    let target = DeleteTarget::from_args(vec![9, 9, 40], None, None)?;
    assert_eq!(commands::delete_blocks(store.as_ref(), &target, &mut out).await?.blocks, 1);

    assert_eq!(commands::print_gaps(store.as_ref(), false, &mut out).await?, 4);
    let gaps = find_stored_gaps(store.as_ref(), true).await?;
    assert_eq!(gaps.iter().map(|g| (g.start, g.end)).collect::<Vec<_>>(), vec![(9, 9), (4, 6)]);

    // Forced re-import of a present block leaves the counts unchanged
    let before = store.stats().await?;
    commands::import_blocks(&importer, &locks, &config, &[12], true, &mut out).await?;
    assert_eq!(store.stats().await?, before);

    let cleared = commands::clear_table(store.as_ref(), "actions", &mut out).await?;
    assert_eq!(cleared.actions, 8 * 2);
    let stats = store.stats().await?;
    assert_eq!((stats.blocks, stats.transactions, stats.actions), (8, 8, 0));

    let text = String::from_utf8(out)?;
    assert!(text.contains("Block 12 already exists, re-importing"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_blocks_sharing_a_txid_on_rocksdb() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let (node, shared_txid) = chain_with_shared_txid();
    let store = Arc::new(RocksHistoryStore::new(open_database(dir.path())?));
    let importer = Arc::new(BlockImporter::new(Arc::new(node), store.clone()));

    let first = tokio::spawn({
        let importer = importer.clone();
        async move { importer.import_block(10).await }
    });
    let second = tokio::spawn({
        let importer = importer.clone();
        async move { importer.import_block(11).await }
    });
    assert!(first.await??.was_imported());
    assert!(second.await??.was_imported());

    assert_shared_txid_stored_once(store.as_ref(), &shared_txid).await?;
    Ok(())
}

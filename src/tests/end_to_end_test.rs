//! Full pipeline: orchestrator -> task queue -> importer -> storage.

use super::*;
use anyhow::Result;
use eoshistory_sync::mock::{MemoryLockStore, MemoryStore, MockChainNode};
use eoshistory_sync::{
    find_stored_gaps, BlockImporter, HistoryStore, HistorySync, SyncState, TaskQueue,
};
use std::sync::Arc;

struct Pipeline {
    node: Arc<MockChainNode>,
    store: Arc<MemoryStore>,
    queue: Arc<TaskQueue>,
    locks: LockManager<MemoryLockStore>,
    listener: Arc<RecordingListener>,
}

fn pipeline(node: MockChainNode) -> Pipeline {
    let node = Arc::new(node);
    let store = Arc::new(MemoryStore::new());
    let locks = memory_locks("e2e@test");
    let listener = Arc::new(RecordingListener::default());
    let importer = BlockImporter::new(node.clone(), store.clone());
    let queue = Arc::new(TaskQueue::start(
        fast_queue_config("celery"),
        importer,
        locks.clone(),
        listener.clone(),
    ));
    Pipeline {
        node,
        store,
        queue,
        locks,
        listener,
    }
}

#[tokio::test]
async fn test_sync_small_range_end_to_end() -> Result<()> {
    init_logging();
    let p = pipeline(chain_with(100..=103, 1, 2));

    let config = SyncConfig {
        start_block: Some(100),
        ..fast_sync_config()
    };
    let mut sync = HistorySync::new(p.node.clone(), p.store.clone(), p.queue.clone(), p.locks.clone(), config);
    let report = sync.run().await?;
    p.queue.shutdown().await;

    assert_eq!(report.state, SyncState::Done);
    assert_eq!(report.start_block, 100);
    assert_eq!(report.end_block, 103);
    assert!(report.blocks_queued >= 3);

    let stats = p.store.stats().await?;
    assert_eq!(stats.blocks, 3);
    assert_eq!(stats.transactions, 3);
    assert_eq!(stats.actions, 6);
    assert_eq!(stats.lowest_block, Some(100));
    assert_eq!(stats.highest_block, Some(102));
    assert!(find_stored_gaps(p.store.as_ref(), true).await?.is_empty());
    assert!(p.listener.failed.lock().unwrap().is_empty());

    // Session and gap locks are gone once the run is over
    assert!(p.locks.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_resume_fills_missing_blocks() -> Result<()> {
    init_logging();
    let p = pipeline(chain_with(1..=40, 2, 1));

    // Seed a store with holes: 1..=10 and 20..=25 present
    let importer = BlockImporter::new(p.node.clone(), p.store.clone());
    for number in (1..=10).chain(20..=25) {
        importer.import_block(number).await?;
    }
    assert_eq!(find_stored_gaps(p.store.as_ref(), true).await?.len(), 1);

    let mut sync = HistorySync::new(
        p.node.clone(),
        p.store.clone(),
        p.queue.clone(),
        p.locks.clone(),
        fast_sync_config(),
    );
    let report = sync.run().await?;
    p.queue.shutdown().await;

    assert_eq!(report.state, SyncState::Done);
    assert_eq!(report.start_block, 26);
    assert_eq!(report.end_block, 40);
    assert!(report.gaps_found >= 1);

    let numbers = p.store.block_numbers().await?;
    assert_eq!(numbers, (1..40).collect::<Vec<u64>>());
    assert_eq!(p.store.stats().await?.transactions, 39 * 2);
    Ok(())
}

#[tokio::test]
async fn test_missing_blocks_are_reported_not_fatal() -> Result<()> {
    init_logging();
    let node = chain_with((200..=210).filter(|n| *n != 205), 1, 1);
    let p = pipeline(node);

    let config = SyncConfig {
        start_block: Some(200),
        skip_gaps: true,
        ..fast_sync_config()
    };
    let mut sync = HistorySync::new(p.node.clone(), p.store.clone(), p.queue.clone(), p.locks.clone(), config);
    let report = sync.run().await?;
    p.queue.shutdown().await;

    assert_eq!(report.state, SyncState::Done);
    assert_eq!(report.blocks_queued, 10);
    assert_eq!(p.store.stats().await?.blocks, 9);

    let failed = p.listener.failed.lock().unwrap().clone();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, 205);
    Ok(())
}

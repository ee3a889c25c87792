//! Shared fixtures for the end-to-end suites.

use eoshistory_sync::mock::{synthetic_block, MemoryLockStore, MemoryStore, MockChainNode};
use eoshistory_sync::{
    BlockImporter, HistoryStore, JobListener, JobReport, LockManager, QueueConfig, SyncConfig,
    SyncError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub mod end_to_end_test;
pub mod lock_test;
pub mod rocksdb_test;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A node serving `blocks` with the given number of transactions and actions each.
pub fn chain_with(blocks: impl IntoIterator<Item = u64>, transactions: usize, actions: usize) -> MockChainNode {
    let node = MockChainNode::new();
    for number in blocks {
        node.add_block(synthetic_block(number, transactions, actions));
    }
    node
}

/// Blocks 10 (one transaction) and 11 (two transactions) whose first
/// transactions carry the same txid. Returns the node and that txid.
pub fn chain_with_shared_txid() -> (MockChainNode, String) {
    let node = chain_with([10], 1, 2);
    let shared_txid = format!("{:016x}{:048x}", 10, 0);
    let mut block = synthetic_block(11, 2, 2);
    block["transactions"][0]["trx"]["id"] = serde_json::json!(shared_txid);
    node.add_block(block);
    (node, shared_txid)
}

/// Both blocks of [`chain_with_shared_txid`] are stored and the shared
/// transaction exists exactly once, owned by one of them.
pub async fn assert_shared_txid_stored_once<S: HistoryStore>(store: &S, shared_txid: &str) -> anyhow::Result<()> {
    assert!(store.get_block(10).await?.is_some());
    assert!(store.get_block(11).await?.is_some());

    let owner = store.get_transaction(shared_txid).await?.unwrap();
    assert!(owner.block_number == 10 || owner.block_number == 11);
    assert_eq!(store.transaction_actions(shared_txid).await?.len(), 2);

    let in_10 = store.block_transactions(10).await?;
    let in_11 = store.block_transactions(11).await?;
    let shared_rows = in_10.iter().chain(&in_11).filter(|tx| tx.txid == shared_txid).count();
    assert_eq!(shared_rows, 1);
    assert_eq!(in_10.len() + in_11.len(), 2);

    let stats = store.stats().await?;
    assert_eq!((stats.blocks, stats.transactions, stats.actions), (2, 2, 4));
    Ok(())
}

pub fn memory_importer(node: MockChainNode) -> BlockImporter<MockChainNode, MemoryStore> {
    BlockImporter::new(Arc::new(node), Arc::new(MemoryStore::new()))
}

pub fn memory_locks(holder: &str) -> LockManager<MemoryLockStore> {
    LockManager::with_identity(Arc::new(MemoryLockStore::new()), holder, "pid test")
}

/// Orchestrator settings with every pause shortened for tests.
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig {
        lock_owner: "e2e".to_string(),
        max_queue_threads: 3,
        blocks_per_thread: 4,
        max_in_flight: 10,
        queue_ceiling: 50,
        backpressure_poll: Duration::from_millis(5),
        chunk_pause: Duration::ZERO,
        worker_launch_pause: Duration::ZERO,
        gap_pause: Duration::ZERO,
        ..Default::default()
    }
}

pub fn fast_queue_config(name: &str) -> QueueConfig {
    QueueConfig {
        name: name.to_string(),
        workers: 4,
        max_retries: 5,
        retry_delay: Duration::from_millis(10),
        block_lock_ttl: Duration::from_secs(30),
    }
}

/// Listener that records job outcomes.
#[derive(Default)]
pub struct RecordingListener {
    pub succeeded: Mutex<Vec<JobReport>>,
    pub failed: Mutex<Vec<(u64, String)>>,
}

impl JobListener for RecordingListener {
    fn on_success(&self, report: &JobReport) {
        self.succeeded.lock().unwrap().push(report.clone());
    }

    fn on_failure(&self, block_number: u64, error: &SyncError) {
        self.failed.lock().unwrap().push((block_number, error.to_string()));
    }
}

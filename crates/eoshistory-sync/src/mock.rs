//! Mock implementations for testing

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

use crate::{
    Action, Block, BlockWriter, ChainInfo, ChainNodeAdapter, DeleteStats, HistoryStore, JobHandle,
    JobQueue, LockRecord, LockStore, RawBlock, Savepoint, StagedBlock, StoreStats, SyncError,
    SyncResult, Table, Transaction,
};

/// Build a node-style block body with `transactions` executed transactions of
/// `actions` transfer actions each.
pub fn synthetic_block(number: u64, transactions: usize, actions: usize) -> Value {
    let timestamp = Utc
        .timestamp_millis_opt(1_559_347_200_000 + number as i64 * 500)
        .unwrap()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string();
    let transactions: Vec<Value> = (0..transactions)
        .map(|t| {
            let acts: Vec<Value> = (0..actions)
                .map(|a| {
                    json!({
                        "account": "eosio.token",
                        "name": format!("action{}", a),
                        "authorization": [{"actor": "alice", "permission": "active"}],
                        "data": {
                            "from": "alice",
                            "to": "bob",
                            "quantity": "1.0000 EOS",
                            "memo": format!("block {} tx {} action {}", number, t, a)
                        },
                        "hex_data": "0000"
                    })
                })
                .collect();
            json!({
                "status": "executed",
                "cpu_usage_us": 100,
                "net_usage_words": 12,
                "trx": {
                    "id": format!("{:016x}{:048x}", number, t),
                    "signatures": ["SIG_K1_mock"],
                    "compression": "none",
                    "packed_trx": "00",
                    "context_free_data": [],
                    "transaction": {
                        "expiration": timestamp,
                        "ref_block_num": number & 0xffff,
                        "actions": acts
                    }
                }
            })
        })
        .collect();

    json!({
        "block_num": number,
        "timestamp": timestamp,
        "producer": "eosio",
        "confirmed": 0,
        "previous": format!("{:064x}", number.saturating_sub(1)),
        "transaction_mroot": format!("{:064x}", 0),
        "action_mroot": format!("{:064x}", 0),
        "id": format!("{:064x}", number),
        "schedule_version": 1,
        "new_producers": null,
        "header_extensions": [],
        "producer_signature": "SIG_K1_producer",
        "ref_block_prefix": 12345,
        "transactions": transactions
    })
}

/// Mock chain node adapter for testing
#[derive(Debug, Clone)]
pub struct MockChainNode {
    blocks: Arc<RwLock<HashMap<u64, Value>>>,
    head: Arc<RwLock<u64>>,
    failures: Arc<RwLock<HashMap<u64, u32>>>,
    connected: Arc<RwLock<bool>>,
    fetches: Arc<AtomicUsize>,
}

impl Default for MockChainNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainNode {
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(RwLock::new(HashMap::new())),
            head: Arc::new(RwLock::new(0)),
            failures: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(RwLock::new(true)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a block body; the head moves up to it if it is higher.
    pub fn add_block(&self, body: Value) {
        let number = body.get("block_num").and_then(Value::as_u64).unwrap();
        self.blocks.write().unwrap().insert(number, body);
        let mut head = self.head.write().unwrap();
        if number > *head {
            *head = number;
        }
    }

    pub fn set_head(&self, head: u64) {
        *self.head.write().unwrap() = head;
    }

    /// Fail the next `times` fetches of `number`.
    pub fn fail_block(&self, number: u64, times: u32) {
        self.failures.write().unwrap().insert(number, times);
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.write().unwrap() = connected;
    }

    /// Number of `get_block` calls so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainNodeAdapter for MockChainNode {
    async fn get_block(&self, number: u64) -> SyncResult<RawBlock> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !*self.connected.read().unwrap() {
            return Err(SyncError::ChainNode("Node not connected".to_string()));
        }
        {
            let mut failures = self.failures.write().unwrap();
            if let Some(remaining) = failures.get_mut(&number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SyncError::ChainNode(format!(
                        "Injected failure fetching block {}",
                        number
                    )));
                }
            }
        }
        let body = self.blocks.read().unwrap().get(&number).cloned();
        match body {
            Some(body) => RawBlock::from_json(body).map_err(|e| SyncError::ChainNode(e.to_string())),
            None => Err(SyncError::BlockNotFound(number)),
        }
    }

    async fn get_info(&self) -> SyncResult<ChainInfo> {
        if !*self.connected.read().unwrap() {
            return Err(SyncError::ChainNode("Node not connected".to_string()));
        }
        Ok(ChainInfo {
            head_block_num: *self.head.read().unwrap(),
            ..ChainInfo::default()
        })
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    blocks: BTreeMap<u64, Block>,
    transactions: BTreeMap<String, Transaction>,
    actions: BTreeMap<(String, u32), Action>,
}

impl MemoryTables {
    fn remove_transaction(&mut self, txid: &str, stats: &mut DeleteStats) {
        if self.transactions.remove(txid).is_some() {
            stats.transactions += 1;
        }
        let keys: Vec<(String, u32)> = self
            .actions
            .range((txid.to_string(), 0)..=(txid.to_string(), u32::MAX))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.actions.remove(&key);
            stats.actions += 1;
        }
    }

    fn remove_block(&mut self, number: u64, stats: &mut DeleteStats) {
        if self.blocks.remove(&number).is_none() {
            return;
        }
        stats.blocks += 1;
        let txids: Vec<String> = self
            .transactions
            .values()
            .filter(|tx| tx.block_number == number)
            .map(|tx| tx.txid.clone())
            .collect();
        for txid in txids {
            self.remove_transaction(&txid, stats);
        }
    }
}

/// In-memory history store with the same transactional behaviour as the
/// RocksDB backend: block writes are serialized and committed all at once.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<MemoryTables>>,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryBlockWriter {
    tables: Arc<RwLock<MemoryTables>>,
    staged: StagedBlock,
    _guard: OwnedMutexGuard<()>,
}

impl BlockWriter for MemoryBlockWriter {
    fn block(&self) -> &Block {
        &self.staged.block
    }

    fn savepoint(&self) -> Savepoint {
        self.staged.savepoint()
    }

    fn rollback_to(&mut self, savepoint: Savepoint) {
        self.staged.rollback_to(savepoint)
    }

    fn insert_transaction(&mut self, tx: Transaction) -> SyncResult<()> {
        let stored = self.tables.read().unwrap().transactions.contains_key(&tx.txid);
        self.staged.push_transaction(tx, stored)
    }

    fn bulk_insert_actions(&mut self, actions: Vec<Action>) -> SyncResult<usize> {
        let tables = self.tables.read().unwrap();
        Ok(self.staged.push_actions_ignore_conflicts(actions, |a| {
            tables.actions.contains_key(&(a.txid.clone(), a.action_index))
        }))
    }

    fn commit(self: Box<Self>) -> SyncResult<()> {
        let MemoryBlockWriter { tables, staged, _guard } = *self;
        let mut tables = tables.write().unwrap();
        if tables.blocks.contains_key(&staged.block.number) {
            return Err(SyncError::Conflict(format!(
                "blocks.number = {}",
                staged.block.number
            )));
        }
        tables.blocks.insert(staged.block.number, staged.block);
        for tx in staged.transactions {
            tables.transactions.insert(tx.txid.clone(), tx);
        }
        for action in staged.actions {
            tables
                .actions
                .insert((action.txid.clone(), action.action_index), action);
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn get_block(&self, number: u64) -> SyncResult<Option<Block>> {
        Ok(self.tables.read().unwrap().blocks.get(&number).cloned())
    }

    async fn block_numbers(&self) -> SyncResult<Vec<u64>> {
        Ok(self.tables.read().unwrap().blocks.keys().copied().collect())
    }

    async fn highest_block(&self) -> SyncResult<Option<u64>> {
        Ok(self.tables.read().unwrap().blocks.keys().next_back().copied())
    }

    async fn get_transaction(&self, txid: &str) -> SyncResult<Option<Transaction>> {
        Ok(self.tables.read().unwrap().transactions.get(txid).cloned())
    }

    async fn block_transactions(&self, number: u64) -> SyncResult<Vec<Transaction>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .transactions
            .values()
            .filter(|tx| tx.block_number == number)
            .cloned()
            .collect())
    }

    async fn transaction_actions(&self, txid: &str) -> SyncResult<Vec<Action>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .actions
            .range((txid.to_string(), 0)..=(txid.to_string(), u32::MAX))
            .map(|(_, action)| action.clone())
            .collect())
    }

    async fn begin_block(&self, block: Block) -> SyncResult<Box<dyn BlockWriter>> {
        let guard = self.writer.clone().lock_owned().await;
        if self.tables.read().unwrap().blocks.contains_key(&block.number) {
            return Err(SyncError::Conflict(format!("blocks.number = {}", block.number)));
        }
        Ok(Box::new(MemoryBlockWriter {
            tables: self.tables.clone(),
            staged: StagedBlock::new(block),
            _guard: guard,
        }))
    }

    async fn delete_blocks(&self, numbers: &[u64]) -> SyncResult<DeleteStats> {
        let _guard = self.writer.lock().await;
        let mut tables = self.tables.write().unwrap();
        let mut stats = DeleteStats::default();
        for number in numbers {
            tables.remove_block(*number, &mut stats);
        }
        Ok(stats)
    }

    async fn delete_block_range(&self, start: u64, end: u64) -> SyncResult<DeleteStats> {
        let _guard = self.writer.lock().await;
        let mut tables = self.tables.write().unwrap();
        let numbers: Vec<u64> = tables.blocks.range(start..=end).map(|(n, _)| *n).collect();
        let mut stats = DeleteStats::default();
        for number in numbers {
            tables.remove_block(number, &mut stats);
        }
        Ok(stats)
    }

    async fn clear_table(&self, table: Table) -> SyncResult<DeleteStats> {
        let _guard = self.writer.lock().await;
        let mut tables = self.tables.write().unwrap();
        let stats = DeleteStats {
            blocks: if table == Table::Blocks { tables.blocks.len() } else { 0 },
            transactions: if table == Table::Actions { 0 } else { tables.transactions.len() },
            actions: tables.actions.len(),
        };
        tables.actions.clear();
        if table != Table::Actions {
            tables.transactions.clear();
        }
        if table == Table::Blocks {
            tables.blocks.clear();
        }
        Ok(stats)
    }

    async fn stats(&self) -> SyncResult<StoreStats> {
        let tables = self.tables.read().unwrap();
        Ok(StoreStats {
            blocks: tables.blocks.len(),
            transactions: tables.transactions.len(),
            actions: tables.actions.len(),
            lowest_block: tables.blocks.keys().next().copied(),
            highest_block: tables.blocks.keys().next_back().copied(),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// In-memory lock rows
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    rows: Arc<Mutex<HashMap<String, LockRecord>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get_lock(&self, name: &str) -> SyncResult<Option<LockRecord>> {
        Ok(self.rows.lock().unwrap().get(name).cloned())
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&LockRecord>,
        new: Option<LockRecord>,
    ) -> SyncResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows.get(name) != expected {
            return Ok(false);
        }
        match new {
            Some(record) => rows.insert(name.to_string(), record),
            None => rows.remove(name),
        };
        Ok(true)
    }

    async fn list_locks(&self) -> SyncResult<Vec<LockRecord>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn delete_lock(&self, name: &str) -> SyncResult<bool> {
        Ok(self.rows.lock().unwrap().remove(name).is_some())
    }
}

/// Job queue that records submissions and reports queue depths from a script.
///
/// Depth queries pop the script front; once it is exhausted the last value
/// keeps being reported (0 for an empty script).
#[derive(Debug)]
pub struct ScriptedQueue {
    name: String,
    depths: Mutex<VecDeque<usize>>,
    last_depth: Mutex<usize>,
    depth_queries: AtomicUsize,
    submitted: Mutex<Vec<u64>>,
    next_id: AtomicU64,
}

impl ScriptedQueue {
    pub fn new(name: &str, depths: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            depths: Mutex::new(depths.into()),
            last_depth: Mutex::new(0),
            depth_queries: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn submitted(&self) -> Vec<u64> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_sorted(&self) -> Vec<u64> {
        let mut blocks = self.submitted();
        blocks.sort_unstable();
        blocks
    }

    pub fn depth_queries(&self) -> usize {
        self.depth_queries.load(Ordering::SeqCst)
    }
}

impl JobQueue for ScriptedQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, block_number: u64) -> SyncResult<JobHandle> {
        self.submitted.lock().unwrap().push(block_number);
        Ok(JobHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            block_number,
            queue: self.name.clone(),
        })
    }

    fn pending_count(&self) -> SyncResult<usize> {
        self.depth_queries.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last_depth.lock().unwrap();
        if let Some(depth) = self.depths.lock().unwrap().pop_front() {
            *last = depth;
        }
        Ok(*last)
    }
}

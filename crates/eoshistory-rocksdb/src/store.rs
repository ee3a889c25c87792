//! RocksDB-backed `HistoryStore`.

use async_trait::async_trait;
use log::{debug, info};
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use eoshistory_sync::{
    Action, Block, BlockWriter, DeleteStats, HistoryStore, Savepoint, StagedBlock, StoreStats,
    SyncError, SyncResult, Table, Transaction,
};

use crate::keys::*;

fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| SyncError::Serialization(format!("Failed to encode row: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SyncResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| SyncError::Serialization(format!("Failed to decode row: {}", e)))
}

fn get_raw(db: &DB, key: &[u8]) -> SyncResult<Option<Vec<u8>>> {
    db.get(key)
        .map_err(|e| SyncError::Storage(format!("Database error: {}", e)))
}

fn exists(db: &DB, key: &[u8]) -> SyncResult<bool> {
    Ok(get_raw(db, key)?.is_some())
}

/// Every key/value pair under `prefix`, in key order.
fn scan_prefix(db: &DB, prefix: &[u8]) -> SyncResult<Vec<(Box<[u8]>, Box<[u8]>)>> {
    let mut rows = Vec::new();
    for item in db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
        let (key, value) =
            item.map_err(|e| SyncError::Storage(format!("Failed to iterate keys: {}", e)))?;
        if !key.starts_with(prefix) {
            break;
        }
        rows.push((key, value));
    }
    Ok(rows)
}

/// Stage deletion of one block and everything under it.
fn delete_block_into(
    db: &DB,
    batch: &mut WriteBatch,
    number: u64,
    stats: &mut DeleteStats,
) -> SyncResult<()> {
    if !exists(db, &block_key(number))? {
        return Ok(());
    }
    batch.delete(block_key(number));
    stats.blocks += 1;

    let prefix = block_tx_prefix(number);
    for (key, _) in scan_prefix(db, &prefix)? {
        let txid = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
        batch.delete(&key);
        batch.delete(tx_key(&txid));
        stats.transactions += 1;
        for (action, _) in scan_prefix(db, &action_prefix(&txid))? {
            batch.delete(&action);
            stats.actions += 1;
        }
    }
    Ok(())
}

fn write_batch(db: &DB, batch: WriteBatch) -> SyncResult<()> {
    db.write(batch)
        .map_err(|e| SyncError::Storage(format!("Failed to write batch: {}", e)))
}

/// History store persisting rows as JSON values.
///
/// Block writes and deletes are serialized through one writer mutex, so the
/// existence checks made while staging still hold when the batch commits.
#[derive(Clone)]
pub struct RocksHistoryStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksHistoryStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn db(&self) -> &Arc<DB> {
        &self.db
    }

    fn count_prefix(&self, prefix: &[u8]) -> SyncResult<usize> {
        Ok(scan_prefix(&self.db, prefix)?.len())
    }

    fn lowest_block(&self) -> SyncResult<Option<u64>> {
        let mut iter = self
            .db
            .iterator(IteratorMode::From(BLOCK_PREFIX, Direction::Forward));
        match iter.next() {
            Some(item) => {
                let (key, _) = item
                    .map_err(|e| SyncError::Storage(format!("Failed to iterate keys: {}", e)))?;
                Ok(block_number_from_key(&key))
            }
            None => Ok(None),
        }
    }
}

struct RocksBlockWriter {
    db: Arc<DB>,
    staged: StagedBlock,
    _guard: OwnedMutexGuard<()>,
}

impl BlockWriter for RocksBlockWriter {
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
        let stored = exists(&self.db, &tx_key(&tx.txid))?;
        self.staged.push_transaction(tx, stored)
    }

    fn bulk_insert_actions(&mut self, actions: Vec<Action>) -> SyncResult<usize> {
        let mut stored = HashSet::new();
        for action in &actions {
            if exists(&self.db, &action_key(&action.txid, action.action_index))? {
                stored.insert((action.txid.clone(), action.action_index));
            }
        }
        Ok(self.staged.push_actions_ignore_conflicts(actions, |a| {
            stored.contains(&(a.txid.clone(), a.action_index))
        }))
    }

    fn commit(self: Box<Self>) -> SyncResult<()> {
        let staged = &self.staged;
        let number = staged.block.number;
        if exists(&self.db, &block_key(number))? {
            return Err(SyncError::Conflict(format!("blocks.number = {}", number)));
        }

        let mut batch = WriteBatch::default();
        batch.put(block_key(number), encode(&staged.block)?);
        for tx in &staged.transactions {
            batch.put(tx_key(&tx.txid), encode(tx)?);
            batch.put(block_tx_key(number, &tx.txid), b"");
        }
        for action in &staged.actions {
            batch.put(action_key(&action.txid, action.action_index), encode(action)?);
        }
        write_batch(&self.db, batch)?;
        debug!(
            "Committed block {} ({} transactions, {} actions)",
            number,
            staged.transactions.len(),
            staged.actions.len()
        );
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for RocksHistoryStore {
    async fn get_block(&self, number: u64) -> SyncResult<Option<Block>> {
        get_raw(&self.db, &block_key(number))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    async fn block_numbers(&self) -> SyncResult<Vec<u64>> {
        let mut numbers = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(BLOCK_PREFIX, Direction::Forward))
        {
            let (key, _) =
                item.map_err(|e| SyncError::Storage(format!("Failed to iterate keys: {}", e)))?;
            match block_number_from_key(&key) {
                Some(number) => numbers.push(number),
                None => break,
            }
        }
        Ok(numbers)
    }

    async fn highest_block(&self) -> SyncResult<Option<u64>> {
        let mut iter = self
            .db
            .iterator(IteratorMode::From(BLOCK_UPPER_BOUND, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, _) = item
                    .map_err(|e| SyncError::Storage(format!("Failed to iterate keys: {}", e)))?;
                Ok(block_number_from_key(&key))
            }
            None => Ok(None),
        }
    }

    async fn get_transaction(&self, txid: &str) -> SyncResult<Option<Transaction>> {
        get_raw(&self.db, &tx_key(txid))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    async fn block_transactions(&self, number: u64) -> SyncResult<Vec<Transaction>> {
        let prefix = block_tx_prefix(number);
        let mut transactions = Vec::new();
        for (key, _) in scan_prefix(&self.db, &prefix)? {
            let txid = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            if let Some(bytes) = get_raw(&self.db, &tx_key(&txid))? {
                transactions.push(decode(&bytes)?);
            }
        }
        Ok(transactions)
    }

    async fn transaction_actions(&self, txid: &str) -> SyncResult<Vec<Action>> {
        scan_prefix(&self.db, &action_prefix(txid))?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    async fn begin_block(&self, block: Block) -> SyncResult<Box<dyn BlockWriter>> {
        let guard = self.writer.clone().lock_owned().await;
        if exists(&self.db, &block_key(block.number))? {
            return Err(SyncError::Conflict(format!("blocks.number = {}", block.number)));
        }
        Ok(Box::new(RocksBlockWriter {
            db: self.db.clone(),
            staged: StagedBlock::new(block),
            _guard: guard,
        }))
    }

    async fn delete_blocks(&self, numbers: &[u64]) -> SyncResult<DeleteStats> {
        let _guard = self.writer.lock().await;
        let mut batch = WriteBatch::default();
        let mut stats = DeleteStats::default();
        let unique: BTreeSet<u64> = numbers.iter().copied().collect();
        for number in unique {
            delete_block_into(&self.db, &mut batch, number, &mut stats)?;
        }
        write_batch(&self.db, batch)?;
        Ok(stats)
    }

    async fn delete_block_range(&self, start: u64, end: u64) -> SyncResult<DeleteStats> {
        let _guard = self.writer.lock().await;
        let upper = block_key(end);
        let mut numbers = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(&block_key(start), Direction::Forward))
        {
            let (key, _) =
                item.map_err(|e| SyncError::Storage(format!("Failed to iterate keys: {}", e)))?;
            if !key.starts_with(BLOCK_PREFIX) || &key[..] > upper.as_slice() {
                break;
            }
            if let Some(number) = block_number_from_key(&key) {
                numbers.push(number);
            }
        }

        let mut batch = WriteBatch::default();
        let mut stats = DeleteStats::default();
        for number in numbers {
            delete_block_into(&self.db, &mut batch, number, &mut stats)?;
        }
        write_batch(&self.db, batch)?;
        Ok(stats)
    }

    async fn clear_table(&self, table: Table) -> SyncResult<DeleteStats> {
        let _guard = self.writer.lock().await;
        let mut batch = WriteBatch::default();
        let mut stats = DeleteStats::default();

        let mut prefixes: Vec<&[u8]> = vec![ACTION_PREFIX];
        if table != Table::Actions {
            prefixes.push(TX_PREFIX);
            prefixes.push(BLOCK_TX_PREFIX);
        }
        if table == Table::Blocks {
            prefixes.push(BLOCK_PREFIX);
        }

        for prefix in prefixes {
            let rows = scan_prefix(&self.db, prefix)?;
            match prefix {
                p if p == ACTION_PREFIX => stats.actions += rows.len(),
                p if p == TX_PREFIX => stats.transactions += rows.len(),
                p if p == BLOCK_PREFIX => stats.blocks += rows.len(),
                _ => {}
            }
            for (key, _) in rows {
                batch.delete(&key);
            }
        }
        write_batch(&self.db, batch)?;
        info!("Cleared table {} ({})", table, stats);
        Ok(stats)
    }

    async fn stats(&self) -> SyncResult<StoreStats> {
        Ok(StoreStats {
            blocks: self.count_prefix(BLOCK_PREFIX)?,
            transactions: self.count_prefix(TX_PREFIX)?,
            actions: self.count_prefix(ACTION_PREFIX)?,
            lowest_block: self.lowest_block()?,
            highest_block: self.highest_block().await?,
        })
    }

    async fn is_available(&self) -> bool {
        self.db.get(b"__test").is_ok()
    }
}

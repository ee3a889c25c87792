//! Block importer
//!
//! Imports one block with its executed transactions and their actions through
//! a single [`BlockWriter`]. Each transaction is staged inside its own
//! savepoint, so a bad transaction is rolled back and skipped while the rest
//! of the block still commits.

use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    Action, Block, BlockWriter, ChainNodeAdapter, HistoryStore, ImportOutcome, RawBlock,
    RawTransaction, SyncError, SyncResult, Transaction,
};

/// What to import: a block number to fetch, or a block already fetched.
#[derive(Debug, Clone)]
pub enum BlockSource {
    Number(u64),
    Raw(RawBlock),
}

impl BlockSource {
    pub fn block_number(&self) -> u64 {
        match self {
            BlockSource::Number(n) => *n,
            BlockSource::Raw(raw) => raw.block_num,
        }
    }
}

impl From<u64> for BlockSource {
    fn from(number: u64) -> Self {
        BlockSource::Number(number)
    }
}

impl From<RawBlock> for BlockSource {
    fn from(raw: RawBlock) -> Self {
        BlockSource::Raw(raw)
    }
}

/// Why a transaction was left out of its block.
#[derive(Debug)]
pub enum TransactionSkip {
    /// The txid is already stored
    Conflict(SyncError),
    /// Not executed, no txid, or malformed body
    Invalid(SyncError),
    /// Anything else
    Failed(SyncError),
}

impl TransactionSkip {
    pub fn classify(err: SyncError) -> Self {
        match err {
            SyncError::Conflict(_) => TransactionSkip::Conflict(err),
            SyncError::InvalidInput(_) => TransactionSkip::Invalid(err),
            other => TransactionSkip::Failed(other),
        }
    }

    fn log(&self, block_number: u64, position: usize, total: usize) {
        match self {
            TransactionSkip::Conflict(e) => warn!(
                "(Block Import: {}) Transaction {} of {} already exists: {}",
                block_number, position, total, e
            ),
            TransactionSkip::Invalid(e) => debug!(
                "Skipping transaction {} of {} on block {}: {}",
                position, total, block_number, e
            ),
            TransactionSkip::Failed(e) => error!(
                "Unknown error importing transaction {} of {} on block {}, skipping: {}",
                position, total, block_number, e
            ),
        }
    }
}

/// Imports blocks from a chain node into a history store.
pub struct BlockImporter<N, S> {
    node: Arc<N>,
    store: Arc<S>,
}

impl<N, S> Clone for BlockImporter<N, S> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            store: self.store.clone(),
        }
    }
}

impl<N, S> BlockImporter<N, S>
where
    N: ChainNodeAdapter,
    S: HistoryStore,
{
    pub fn new(node: Arc<N>, store: Arc<S>) -> Self {
        Self { node, store }
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Import a block by number or from an already fetched [`RawBlock`].
    ///
    /// A block that is already stored, or that a concurrent importer commits
    /// first, yields [`ImportOutcome::AlreadyPresent`] without writing anything.
    pub async fn import_block(&self, source: impl Into<BlockSource>) -> SyncResult<ImportOutcome> {
        let source = source.into();
        let number = source.block_number();

        if let Some(block) = self.store.get_block(number).await? {
            info!("Found block {} in storage, returning stored block", number);
            return Ok(ImportOutcome::AlreadyPresent(block));
        }
        debug!("Block {} not in storage, importing", number);

        let raw = match source {
            BlockSource::Raw(raw) => raw,
            BlockSource::Number(_) => {
                let raw = self.node.get_block(number).await?;
                if raw.block_num != number {
                    return Err(SyncError::ChainNode(format!(
                        "Requested block {} but node returned block {}",
                        number, raw.block_num
                    )));
                }
                raw
            }
        };

        let block = Block::from_raw(&raw)?;
        let mut writer = match self.store.begin_block(block).await {
            Ok(writer) => writer,
            Err(e) if e.is_conflict() => return self.already_present(number, &e).await,
            Err(e) => return Err(e),
        };

        let total = raw.transactions.len();
        let mut transactions_imported = 0;
        let mut actions_imported = 0;
        for (i, entry) in raw.transactions.iter().enumerate() {
            if i % 10 == 0 || i + 1 == total {
                debug!("Importing transaction {} out of {}", i + 1, total);
            }
            let savepoint = writer.savepoint();
            match stage_transaction(writer.as_mut(), number, entry) {
                Ok(actions) => {
                    transactions_imported += 1;
                    actions_imported += actions;
                }
                Err(e) => {
                    writer.rollback_to(savepoint);
                    TransactionSkip::classify(e).log(number, i + 1, total);
                }
            }
        }

        let block = writer.block().clone();
        match writer.commit() {
            Ok(()) => {}
            Err(e) if e.is_conflict() => return self.already_present(number, &e).await,
            Err(e) => return Err(e),
        }

        debug!(
            "Imported block {} with {} of {} transactions ({} actions)",
            number, transactions_imported, total, actions_imported
        );
        Ok(ImportOutcome::Imported {
            block,
            raw,
            transactions_imported,
            actions_imported,
        })
    }

    async fn already_present(&self, number: u64, cause: &SyncError) -> SyncResult<ImportOutcome> {
        warn!(
            "Block {} already exists despite previous retrieval check: {}",
            number, cause
        );
        let block = self.store.get_block(number).await?.ok_or_else(|| {
            SyncError::Storage(format!("Block {} reported as duplicate but not found", number))
        })?;
        Ok(ImportOutcome::AlreadyPresent(block))
    }
}

/// Stage one transaction entry and its actions, returning the number of
/// actions staged.
fn stage_transaction(
    writer: &mut dyn BlockWriter,
    block_number: u64,
    entry: &Value,
) -> SyncResult<usize> {
    let raw = RawTransaction::from_json(entry)?;
    let tx = Transaction::from_raw(&raw, block_number)?;
    let (txid, body) = raw.eligible()?;

    let actions: Vec<Action> = body
        .get("actions")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .enumerate()
                .map(|(index, action)| Action::from_raw(txid, index as u32, action))
                .collect()
        })
        .unwrap_or_default();

    writer.insert_transaction(tx)?;
    writer.bulk_insert_actions(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{synthetic_block, MemoryStore, MockChainNode};
    use serde_json::json;

    fn importer() -> (Arc<MockChainNode>, Arc<MemoryStore>, BlockImporter<MockChainNode, MemoryStore>) {
        let node = Arc::new(MockChainNode::new());
        let store = Arc::new(MemoryStore::new());
        let importer = BlockImporter::new(node.clone(), store.clone());
        (node, store, importer)
    }

    #[tokio::test]
    async fn second_import_is_a_no_op() {
        let (node, store, importer) = importer();
        node.add_block(synthetic_block(10, 2, 3));

        let first = importer.import_block(10).await.unwrap();
        assert!(first.was_imported());
        assert_eq!(first.transactions_imported(), 2);

        let second = importer.import_block(10).await.unwrap();
        assert!(!second.was_imported());
        assert_eq!(node.fetch_count(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.blocks, stats.transactions, stats.actions), (1, 2, 6));
    }

    #[tokio::test]
    async fn ineligible_transactions_are_skipped() {
        let (_node, store, importer) = importer();
        let raw = RawBlock::from_json(json!({
            "block_num": 3,
            "timestamp": "2019-06-01T12:00:00.000",
            "producer": "eosio",
            "transactions": [
                {"status": "executed", "trx": {"id": "ok", "transaction": {"actions": [
                    {"account": "eosio.token", "name": "transfer", "data": {"quantity": "1.0000 EOS"}}
                ]}}},
                {"status": "hard_fail", "trx": {"id": "failed", "transaction": {"actions": []}}},
                {"status": "executed", "trx": "deferred-id-only"},
                {"status": "executed", "trx": {"transaction": {"actions": []}}},
                "garbage"
            ]
        }))
        .unwrap();

        let outcome = importer.import_block(raw).await.unwrap();
        assert_eq!(outcome.transactions_imported(), 1);
        assert!(store.get_transaction("ok").await.unwrap().is_some());
        assert!(store.get_transaction("failed").await.unwrap().is_none());
        assert_eq!(store.transaction_actions("ok").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_txid_in_later_block_is_skipped() {
        let (_node, store, importer) = importer();
        let tx = json!({"status": "executed", "trx": {"id": "dup", "transaction": {"actions": [{"name": "a"}]}}});
        for number in [1u64, 2] {
            let raw = RawBlock::from_json(json!({
                "block_num": number,
                "timestamp": "2019-06-01T12:00:00.000",
                "transactions": [tx.clone()]
            }))
            .unwrap();
            let outcome = importer.import_block(raw).await.unwrap();
            assert!(outcome.was_imported());
            assert_eq!(outcome.transactions_imported(), if number == 1 { 1 } else { 0 });
        }
        assert_eq!(store.get_transaction("dup").await.unwrap().unwrap().block_number, 1);
        assert!(store.get_block(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn actions_keep_original_order() {
        let (node, store, importer) = importer();
        node.add_block(synthetic_block(7, 1, 4));
        importer.import_block(7).await.unwrap();

        let txs = store.block_transactions(7).await.unwrap();
        let actions = store.transaction_actions(&txs[0].txid).await.unwrap();
        let indexes: Vec<u32> = actions.iter().map(|a| a.action_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(actions[2].name, "action2");
    }

    #[tokio::test]
    async fn fetch_failure_writes_nothing() {
        let (_node, store, importer) = importer();
        assert!(importer.import_block(99).await.is_err());
        assert_eq!(store.stats().await.unwrap().blocks, 0);
    }
}

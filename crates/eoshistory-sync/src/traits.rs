//! # Core Trait Definitions for the Ingestion Pipeline
//!
//! The pipeline talks to everything outside of itself through the adapters
//! defined here, so each collaborator can be swapped for a production backend
//! or an in-memory fake.
//!
//! ## Adapter Traits
//!
//! ### [`ChainNodeAdapter`]
//! Fetches raw blocks and chain head information from a chain node. Each call
//! is one network round-trip; implementations must not retry on their own.
//!
//! ### [`HistoryStore`]
//! Persists blocks, transactions and actions with transactional semantics:
//! - **Block transactions**: [`HistoryStore::begin_block`] opens a unit of work
//!   that is either committed whole or dropped
//! - **Nested units**: [`BlockWriter::savepoint`] / [`BlockWriter::rollback_to`]
//!   let one bad transaction roll back without touching its block
//! - **Cascading deletes**: removing a block removes its transactions and actions
//!
//! ### [`LockStore`]
//! Shared rows backing the distributed lock. Only an atomic compare-and-swap
//! is required; the expiry protocol lives in [`crate::LockManager`].
//!
//! ### [`JobQueue`]
//! The boundary between the orchestrator and whatever executes imports.
//! Submission is synchronous because it is called from plain OS threads.
//!
//! ## Service Traits
//!
//! ### [`SyncEngine`]
//! A complete sync session that can be run, stopped and inspected.

use async_trait::async_trait;

use crate::{
    Action, Block, ChainInfo, DeleteStats, JobHandle, JobReport, LockRecord, RawBlock, Savepoint,
    StoreStats, SyncError, SyncReport, SyncResult, SyncStatus, Table, Transaction,
};

/// Trait for chain node adapters that provide raw block data.
///
/// # Error Handling
///
/// Network failures, HTTP errors and malformed responses are all reported as
/// [`SyncError::ChainNode`]. A block the node does not know about is reported
/// as [`SyncError::BlockNotFound`].
#[async_trait]
pub trait ChainNodeAdapter: Send + Sync {
    /// Fetch one block by number.
    async fn get_block(&self, number: u64) -> SyncResult<RawBlock>;

    /// Fetch chain head metadata.
    async fn get_info(&self) -> SyncResult<ChainInfo>;
}

/// Trait for storage backends that persist imported history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Get a stored block by number
    async fn get_block(&self, number: u64) -> SyncResult<Option<Block>>;

    /// All stored block numbers in ascending order
    async fn block_numbers(&self) -> SyncResult<Vec<u64>>;

    /// Highest stored block number, if any block is stored
    async fn highest_block(&self) -> SyncResult<Option<u64>>;

    /// Get a stored transaction by txid
    async fn get_transaction(&self, txid: &str) -> SyncResult<Option<Transaction>>;

    /// Transactions belonging to a block
    async fn block_transactions(&self, number: u64) -> SyncResult<Vec<Transaction>>;

    /// Actions of a transaction, ordered by `action_index`
    async fn transaction_actions(&self, txid: &str) -> SyncResult<Vec<Action>>;

    /// Open a write transaction for a new block.
    ///
    /// Fails with [`SyncError::Conflict`] if the block number is already stored.
    /// Dropping the returned writer without committing discards everything
    /// staged through it.
    async fn begin_block(&self, block: Block) -> SyncResult<Box<dyn BlockWriter>>;

    /// Delete the listed blocks with their transactions and actions
    async fn delete_blocks(&self, numbers: &[u64]) -> SyncResult<DeleteStats>;

    /// Delete every block in `start..=end` with their transactions and actions
    async fn delete_block_range(&self, start: u64, end: u64) -> SyncResult<DeleteStats>;

    /// Delete every row of a table, cascading to dependent tables
    async fn clear_table(&self, table: Table) -> SyncResult<DeleteStats>;

    /// Get storage statistics (row counts, stored range)
    async fn stats(&self) -> SyncResult<StoreStats>;

    /// Check if storage is available and writable
    async fn is_available(&self) -> bool;
}

/// An open write transaction for one block.
///
/// Nothing is visible to readers until [`BlockWriter::commit`] succeeds.
pub trait BlockWriter: Send {
    /// The block row being written
    fn block(&self) -> &Block;

    /// Mark the current position for a nested unit of work
    fn savepoint(&self) -> Savepoint;

    /// Discard everything staged after `savepoint`
    fn rollback_to(&mut self, savepoint: Savepoint);

    /// Stage a transaction row. Fails with [`SyncError::Conflict`] if the
    /// txid is already stored or staged.
    fn insert_transaction(&mut self, tx: Transaction) -> SyncResult<()>;

    /// Stage action rows in one operation, skipping rows that collide on
    /// (`txid`, `action_index`). Returns the number of rows staged.
    fn bulk_insert_actions(&mut self, actions: Vec<Action>) -> SyncResult<usize>;

    /// Atomically persist the block and everything staged with it
    fn commit(self: Box<Self>) -> SyncResult<()>;
}

/// Trait for shared lock rows.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Get the row for a lock name
    async fn get_lock(&self, name: &str) -> SyncResult<Option<LockRecord>>;

    /// Atomically replace the row for `name` if it currently equals `expected`.
    /// `None` on either side means "no row". Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&LockRecord>,
        new: Option<LockRecord>,
    ) -> SyncResult<bool>;

    /// Every stored lock row, expired or not
    async fn list_locks(&self) -> SyncResult<Vec<LockRecord>>;

    /// Unconditionally remove a lock row
    async fn delete_lock(&self, name: &str) -> SyncResult<bool>;
}

/// Trait for the queue that executes "import block N" units of work.
pub trait JobQueue: Send + Sync {
    /// Queue name, also used to scope orchestrator locks
    fn name(&self) -> &str;

    /// Enqueue one block import
    fn submit(&self, block_number: u64) -> SyncResult<JobHandle>;

    /// Units of work submitted but not yet finished
    fn pending_count(&self) -> SyncResult<usize>;
}

/// Continuations invoked when an import job finishes.
pub trait JobListener: Send + Sync {
    fn on_success(&self, report: &JobReport);

    /// Called once retries are exhausted. Must not panic.
    fn on_failure(&self, block_number: u64, error: &SyncError);
}

/// Trait for a complete sync session
#[async_trait]
pub trait SyncEngine: Send {
    /// Run the session to completion or cancellation
    async fn run(&mut self) -> SyncResult<SyncReport>;

    /// Request cancellation; observed at the next suspension point
    fn stop(&self);

    /// Get the current sync status
    fn status(&self) -> SyncStatus;
}

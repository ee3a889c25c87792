//! In-memory staging area shared by [`crate::BlockWriter`] implementations.
//!
//! Rows are appended as the importer walks a block; a [`Savepoint`] is just the
//! row counts at a point in time, so rolling back truncates both lists.

use std::collections::HashSet;

use crate::{Action, Block, SyncError, SyncResult, Transaction};

/// Position inside a [`StagedBlock`] that can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    transactions: usize,
    actions: usize,
}

/// A block and the rows staged with it, not yet visible to readers.
#[derive(Debug, Clone)]
pub struct StagedBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub actions: Vec<Action>,
}

impl StagedBlock {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            transactions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            transactions: self.transactions.len(),
            actions: self.actions.len(),
        }
    }

    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.transactions.truncate(savepoint.transactions);
        self.actions.truncate(savepoint.actions);
    }

    pub fn has_transaction(&self, txid: &str) -> bool {
        self.transactions.iter().any(|tx| tx.txid == txid)
    }

    /// Stage a transaction. `stored` reports whether the txid already exists
    /// in the backing store.
    pub fn push_transaction(&mut self, tx: Transaction, stored: bool) -> SyncResult<()> {
        if stored || self.has_transaction(&tx.txid) {
            return Err(SyncError::Conflict(format!(
                "transactions.txid = {} (block {})",
                tx.txid, self.block.number
            )));
        }
        self.transactions.push(tx);
        Ok(())
    }

    /// Stage actions, dropping any whose (`txid`, `action_index`) is already
    /// staged or, per `stored`, already persisted.
    pub fn push_actions_ignore_conflicts<F>(&mut self, actions: Vec<Action>, stored: F) -> usize
    where
        F: Fn(&Action) -> bool,
    {
        let mut seen: HashSet<(String, u32)> = self
            .actions
            .iter()
            .map(|a| (a.txid.clone(), a.action_index))
            .collect();
        let mut staged = 0;
        for action in actions {
            let key = (action.txid.clone(), action.action_index);
            if seen.contains(&key) || stored(&action) {
                continue;
            }
            seen.insert(key);
            self.actions.push(action);
            staged += 1;
        }
        staged
    }
}

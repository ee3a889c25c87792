//! Administrative commands behind the `eoshistory` subcommands.
//!
//! Each command writes its human readable output to the given writer so the
//! binary can pass stdout and tests can pass a buffer.

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{info, warn};
use std::io::{BufRead, Write};

use eoshistory_sync::{
    find_stored_gaps, import_lock_name, run_import_job, BlockImporter, ChainNodeAdapter,
    DeleteStats, HistoryStore, ImportOutcome, LockManager, LockStore, QueueConfig, Table,
};

/// Ranges are deleted in batches of this many blocks.
pub const DELETE_CHUNK_SIZE: u64 = 2000;

pub const BANNER: &str = "EOS Block History Scanner";

pub fn print_banner<W: Write>(out: &mut W) -> Result<()> {
    let rule = "-".repeat(BANNER.len() + 4);
    writeln!(out, "{}", rule)?;
    writeln!(out, "  {}", BANNER)?;
    writeln!(out, "{}", rule)?;
    Ok(())
}

/// Import the given blocks one by one under their import locks.
///
/// Stored blocks are skipped unless `force` is set, in which case they are
/// deleted with their transactions and actions and imported again.
pub async fn import_blocks<N, S, L, W>(
    importer: &BlockImporter<N, S>,
    locks: &LockManager<L>,
    config: &QueueConfig,
    blocks: &[u64],
    force: bool,
    out: &mut W,
) -> Result<usize>
where
    N: ChainNodeAdapter,
    S: HistoryStore,
    L: LockStore + 'static,
    W: Write,
{
    let mut imported = 0;
    for &number in blocks {
        let exists = importer.store().get_block(number).await?.is_some();
        if exists && !force {
            writeln!(out, "Block {} already exists, skipped", number)?;
            continue;
        }

        let (newly_imported, transactions) = if exists {
            writeln!(out, "Block {} already exists, re-importing", number)?;
            let outcome = reimport_locked(importer, locks, number, config).await?;
            (outcome.was_imported(), outcome.transactions_imported())
        } else {
            let report = run_import_job(importer, locks, number, config).await?;
            (report.newly_imported, report.transactions_imported)
        };

        if newly_imported {
            imported += 1;
            writeln!(
                out,
                "Block {} and {} transactions were imported successfully",
                number, transactions
            )?;
        } else {
            writeln!(out, "Block {} already exists, skipped", number)?;
        }
    }
    Ok(imported)
}

/// Delete and import `number` again while holding its import lock, so no
/// queue worker can import the block between the two steps.
async fn reimport_locked<N, S, L>(
    importer: &BlockImporter<N, S>,
    locks: &LockManager<L>,
    number: u64,
    config: &QueueConfig,
) -> Result<ImportOutcome>
where
    N: ChainNodeAdapter,
    S: HistoryStore,
    L: LockStore + 'static,
{
    let guard = locks
        .acquire(&import_lock_name(number), config.block_lock_ttl)
        .await?;
    let result = async {
        let removed = importer.store().delete_blocks(&[number]).await?;
        info!("Removed block {} before re-import ({})", number, removed);
        importer.import_block(number).await
    }
    .await;
    if let Err(e) = guard.release().await {
        warn!("Failed to release import lock for block {}: {}", number, e);
    }
    Ok(result?)
}

/// What `delete` was asked to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Blocks(Vec<u64>),
    /// Inclusive range
    Range { start: u64, end: u64 },
}

impl DeleteTarget {
    /// Validate the CLI input: an explicit list or a range, never both.
    pub fn from_args(blocks: Vec<u64>, start: Option<i64>, end: Option<i64>) -> Result<Self> {
        match (blocks.is_empty(), start, end) {
            (false, None, None) => Ok(DeleteTarget::Blocks(blocks)),
            (false, _, _) => Err(anyhow!(
                "Specify either a list of blocks or --start/--end, not both"
            )),
            (true, Some(start), Some(end)) => {
                if start < 0 || end < 1 || start >= end {
                    return Err(anyhow!(
                        "Invalid block range {}..{}: start must be >= 0 and lower than end",
                        start,
                        end
                    ));
                }
                Ok(DeleteTarget::Range {
                    start: start as u64,
                    end: end as u64,
                })
            }
            (true, None, None) => Err(anyhow!("No blocks to delete. Pass block numbers or --start/--end")),
            (true, _, _) => Err(anyhow!("Both --start and --end are required for a range delete")),
        }
    }
}

/// Delete blocks and everything hanging off them.
pub async fn delete_blocks<S, W>(store: &S, target: &DeleteTarget, out: &mut W) -> Result<DeleteStats>
where
    S: HistoryStore + ?Sized,
    W: Write,
{
    let stats = match target {
        DeleteTarget::Blocks(blocks) => {
            writeln!(out, "Deleting {} blocks", blocks.len())?;
            store.delete_blocks(blocks).await?
        }
        DeleteTarget::Range { start, end } => {
            writeln!(out, "Deleting blocks {} to {}", start, end)?;
            let mut total = DeleteStats::default();
            let mut chunk_start = *start;
            while chunk_start <= *end {
                let chunk_end = chunk_start
                    .saturating_add(DELETE_CHUNK_SIZE - 1)
                    .min(*end);
                let removed = store.delete_block_range(chunk_start, chunk_end).await?;
                info!("Deleted blocks {}..={}: {}", chunk_start, chunk_end, removed);
                total += removed;
                if chunk_end == u64::MAX {
                    break;
                }
                chunk_start = chunk_end + 1;
            }
            total
        }
    };
    writeln!(out, "Deleted {}", stats)?;
    Ok(stats)
}

/// Purge expired locks, then force-release the named ones.
pub async fn clear_locks<L, W>(locks: &LockManager<L>, names: &[String], out: &mut W) -> Result<usize>
where
    L: LockStore + 'static,
    W: Write,
{
    let expired = locks.clean().await?;
    if expired > 0 {
        writeln!(out, "Removed {} expired locks", expired)?;
    }
    let mut released = 0;
    for name in names {
        if locks.unlock(name).await? {
            released += 1;
            writeln!(out, "Released lock '{}'", name)?;
        } else {
            writeln!(out, "Lock '{}' was not held", name)?;
        }
    }
    Ok(released)
}

/// Print live locks. With `purge_expired` expired rows are deleted first,
/// otherwise they are only left out, which works on a read-only handle.
pub async fn list_locks<L, W>(locks: &LockManager<L>, purge_expired: bool, out: &mut W) -> Result<usize>
where
    L: LockStore + 'static,
    W: Write,
{
    if purge_expired {
        locks.clean().await?;
    }
    let now = Utc::now();
    let listed: Vec<_> = locks
        .list()
        .await?
        .into_iter()
        .filter(|lock| !lock.is_expired(now))
        .collect();
    writeln!(out, "There are {} locks currently active:", listed.len())?;
    for lock in &listed {
        writeln!(out, "    {}", lock)?;
    }
    Ok(listed.len())
}

/// Delete every lock. Without `assume_yes` the user must type `YES` on `input`.
pub async fn reset_locks<L, R, W>(
    locks: &LockManager<L>,
    assume_yes: bool,
    input: &mut R,
    out: &mut W,
) -> Result<usize>
where
    L: LockStore + 'static,
    R: BufRead,
    W: Write,
{
    locks.clean().await?;
    let listed = locks.list().await?;
    if listed.is_empty() {
        writeln!(out, "There are no locks to remove")?;
        return Ok(0);
    }

    writeln!(
        out,
        "WARNING: this removes ALL {} locks, including those held by running syncs:",
        listed.len()
    )?;
    for lock in &listed {
        writeln!(out, "    {}", lock)?;
    }

    if !assume_yes {
        write!(out, "Type YES to continue: ")?;
        out.flush()?;
        let mut answer = String::new();
        input.read_line(&mut answer)?;
        if answer.trim() != "YES" {
            writeln!(out, "Aborted, no locks were removed")?;
            return Ok(0);
        }
    }

    let removed = locks.clear_all().await?;
    warn!("Removed all {} locks", removed);
    writeln!(out, "Removed {} locks", removed)?;
    Ok(removed)
}

pub async fn clear_table<S, W>(store: &S, table: &str, out: &mut W) -> Result<DeleteStats>
where
    S: HistoryStore + ?Sized,
    W: Write,
{
    let table: Table = table.parse()?;
    writeln!(out, "Clearing table {}", table)?;
    let stats = store.clear_table(table).await?;
    writeln!(out, "Deleted {}", stats)?;
    Ok(stats)
}

/// Print the current gaps, largest heights first.
pub async fn print_gaps<S, W>(store: &S, include_zero: bool, out: &mut W) -> Result<u64>
where
    S: HistoryStore + ?Sized,
    W: Write,
{
    let gaps = find_stored_gaps(store, !include_zero).await?;
    let missing: u64 = gaps.iter().map(|gap| gap.block_count()).sum();
    writeln!(out, "Found {} gaps ({} missing blocks)", gaps.len(), missing)?;
    for gap in &gaps {
        writeln!(out, "    {}", gap)?;
    }
    Ok(missing)
}

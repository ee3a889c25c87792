//! Sync orchestrator
//!
//! [`HistorySync`] plans a block range, fills gaps in what is already stored,
//! and streams the remaining range into a [`JobQueue`] from a tier of plain OS
//! threads ("range workers"). Queue depth is checked before every worker
//! launch and the run pauses while the queue is at or above its ceiling.
//!
//! The run holds a session lock for its whole duration and a separate gap lock
//! while filling gaps. Both are renewed at every chunk, gap, and backpressure
//! poll. Cancellation is observed at every pause; started workers are always
//! joined before [`HistorySync::run`] returns.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::{
    find_stored_gaps, gaps_lock_name, sync_lock_name, ChainNodeAdapter, HistoryStore, JobQueue,
    LockGuard, LockManager, LockStore, StartType, SyncConfig, SyncEngine, SyncError, SyncReport,
    SyncResult, SyncState, SyncStatus,
};

const PAUSE_SLICE: Duration = Duration::from_millis(250);

/// One range worker: a thread submitting `start..end` to the queue.
struct RangeWorker {
    start: u64,
    end: u64,
    handle: thread::JoinHandle<u64>,
}

/// Orchestrates one sync session.
pub struct HistorySync<N, S, Q, L: LockStore + 'static> {
    node: Arc<N>,
    store: Arc<S>,
    queue: Arc<Q>,
    locks: LockManager<L>,
    config: SyncConfig,
    shutdown: Arc<AtomicBool>,
    state: SyncState,
    start_block: u64,
    end_block: u64,
    blocks_queued: u64,
    gaps_found: usize,
    gaps_filled: usize,
    started_at: Option<Instant>,
    queue_threads: Vec<RangeWorker>,
    session_lock: Option<LockGuard<L>>,
    gap_lock: Option<LockGuard<L>>,
}

impl<N, S, Q, L> HistorySync<N, S, Q, L>
where
    N: ChainNodeAdapter + 'static,
    S: HistoryStore + 'static,
    Q: JobQueue + 'static,
    L: LockStore + 'static,
{
    pub fn new(
        node: Arc<N>,
        store: Arc<S>,
        queue: Arc<Q>,
        locks: LockManager<L>,
        config: SyncConfig,
    ) -> Self {
        Self {
            node,
            store,
            queue,
            locks,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            state: SyncState::Idle,
            start_block: 0,
            end_block: 0,
            blocks_queued: 0,
            gaps_found: 0,
            gaps_filled: 0,
            started_at: None,
            queue_threads: Vec::new(),
            session_lock: None,
            gap_lock: None,
        }
    }

    /// Use an externally owned shutdown flag, e.g. one set by a signal handler.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run the whole session: plan, fill gaps, stream, drain, fill gaps again.
    ///
    /// Cancellation yields `Ok` with state [`SyncState::Aborted`]. Lock
    /// contention on the session lock fails fast.
    pub async fn run(&mut self) -> SyncResult<SyncReport> {
        let started = Instant::now();
        self.started_at = Some(started);
        self.reset_counters();
        self.set_state(SyncState::Planning);

        let lock_name = sync_lock_name(self.queue.name(), &self.config.lock_owner);
        let session = self.locks.acquire(&lock_name, self.config.lock_ttl).await?;
        info!("Obtained lock {}", lock_name);
        self.session_lock = Some(session);

        let result = self.run_locked().await;

        if let Err(e) = self.join_workers().await {
            error!("Failed to join range workers: {}", e);
        }
        self.release_gap_lock().await;
        if let Some(session) = self.session_lock.take() {
            if let Err(e) = session.release().await {
                warn!("Failed to release lock {}: {}", lock_name, e);
            }
        }

        match result {
            Ok(()) => self.set_state(SyncState::Done),
            Err(SyncError::Aborted(reason)) => {
                warn!("Sync aborted: {}", reason);
                self.set_state(SyncState::Aborted);
            }
            Err(e) => {
                self.set_state(SyncState::Aborted);
                return Err(e);
            }
        }

        let report = SyncReport {
            state: self.state,
            start_block: self.start_block,
            end_block: self.end_block,
            blocks_queued: self.blocks_queued,
            gaps_found: self.gaps_found,
            gaps_filled: self.gaps_filled,
            elapsed: started.elapsed(),
        };
        info!(
            "Sync finished in state {}: {} blocks queued, {} of {} gaps filled in {:?}",
            report.state, report.blocks_queued, report.gaps_filled, report.gaps_found, report.elapsed
        );
        Ok(report)
    }

    async fn run_locked(&mut self) -> SyncResult<()> {
        self.wait_for_queue(self.config.queue_ceiling).await?;

        if self.config.gaps_only {
            info!("Requested gaps only, not streaming new blocks");
            self.set_state(SyncState::FillingGaps);
            self.fill_gaps(true).await?;
            return Ok(());
        }

        let (start, end) = self.plan().await?;
        self.start_block = start;
        self.end_block = end;

        if !self.config.skip_gaps {
            self.set_state(SyncState::FillingGaps);
            self.fill_gaps(false).await?;
        }

        self.set_state(SyncState::Streaming);
        self.stream(start, end).await?;

        self.set_state(SyncState::Draining);
        self.join_workers().await?;
        if !self.config.skip_gaps {
            info!("Finished queueing blocks. Waiting for the queue to drain, then filling leftover gaps");
            self.wait_for_queue(self.config.drain_ceiling).await?;
            self.set_state(SyncState::FillingGaps);
            self.fill_gaps(false).await?;
            self.set_state(SyncState::Draining);
            self.wait_for_queue(self.config.drain_ceiling).await?;
        }
        Ok(())
    }

    /// Resolve the `[start, end)` range to stream.
    async fn plan(&mut self) -> SyncResult<(u64, u64)> {
        let info = self.node.get_info().await?;
        let head = info.head_block_num;
        debug!("Chain head is block {}", head);

        let (start_value, start_type) = match self.config.start_block {
            Some(start) => (start, self.config.start_type),
            None => match self.store.highest_block().await? {
                Some(highest) => {
                    info!(
                        "Found existing blocks. Starting from block {} (start type exact)",
                        highest + 1
                    );
                    (highest + 1, StartType::Exact)
                }
                None => (self.config.default_start_block, self.config.start_type),
            },
        };
        let start = match start_type {
            StartType::Exact => start_value,
            StartType::Relative => head.saturating_sub(start_value),
        };

        let end = match self.config.end_block {
            Some(end_value) => {
                let end = if self.config.relative_end {
                    start.saturating_add(end_value)
                } else {
                    end_value
                };
                if end > head {
                    return Err(SyncError::Config(format!(
                        "End block '{}' is higher than actual head block '{}'. Cannot sync.",
                        end, head
                    )));
                }
                end
            }
            None => head,
        };

        info!(
            "Importing blocks starting from {} to end block {}. Total blocks to load: {}",
            start,
            end,
            end.saturating_sub(start)
        );
        Ok((start, end))
    }

    async fn stream(&mut self, start: u64, end: u64) -> SyncResult<()> {
        self.queue_range(start, end, true).await
    }

    /// Queue `[start, end)` in chunks of at most `max_in_flight` blocks,
    /// waiting for the queue to fall below its ceiling before every chunk.
    async fn queue_range(&mut self, start: u64, end: u64, report_progress: bool) -> SyncResult<()> {
        let total = end.saturating_sub(start);
        let chunk = self.config.max_in_flight.max(1);
        let range_started = Instant::now();
        let mut current = start;
        let mut queued = 0u64;

        while current < end {
            self.check_shutdown()?;
            self.renew_held().await?;
            if report_progress && queued > 0 {
                log_progress(queued, total, end - current, range_started.elapsed());
            }

            let chunk_end = current.saturating_add(chunk).min(end);
            self.wait_for_queue(self.config.queue_ceiling).await?;
            self.sync_between(current, chunk_end).await?;
            self.join_workers().await?;

            queued += chunk_end - current;
            current = chunk_end;
            if current < end {
                self.pause(self.config.chunk_pause).await?;
            }
        }

        if report_progress && total > 0 {
            log_progress(queued, total, 0, range_started.elapsed());
        }
        Ok(())
    }

    /// Fill gaps in storage, highest first, from a snapshot taken up front.
    async fn fill_gaps(&mut self, fail_on_contention: bool) -> SyncResult<()> {
        let gaps = find_stored_gaps(self.store.as_ref(), true).await?;
        if gaps.is_empty() {
            debug!("No block gaps found");
            return Ok(());
        }

        let lock_name = gaps_lock_name(self.queue.name(), &self.config.lock_owner);
        match self.locks.acquire(&lock_name, self.config.lock_ttl).await {
            Ok(guard) => self.gap_lock = Some(guard),
            Err(SyncError::LockContention(name)) if !fail_on_contention => {
                warn!("Gap lock {} is held elsewhere, skipping gap filling", name);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let result = self.fill_gap_list(&gaps).await;
        self.release_gap_lock().await;
        result
    }

    async fn fill_gap_list(&mut self, gaps: &[crate::Gap]) -> SyncResult<()> {
        let total = gaps.len();
        self.gaps_found += total;
        info!("Found {} separate block gaps. Filling missing block gaps...", total);

        for (i, gap) in gaps.iter().enumerate() {
            self.check_shutdown()?;
            if gap.start == gap.end {
                info!("[Gap {} / {}] Filling individual missing block {}", i + 1, total, gap.start);
            } else {
                info!(
                    "[Gap {} / {}] Filling gap between block {} and block {} ...",
                    i + 1,
                    total,
                    gap.start,
                    gap.end
                );
            }
            self.queue_range(gap.start, gap.end + 1, false).await?;
            self.gaps_filled += 1;
            self.pause(self.config.gap_pause).await?;
            self.wait_for_queue(self.config.queue_ceiling).await?;
            self.renew_held().await?;
        }
        Ok(())
    }

    /// Partition `[start, end)` across range workers. Returns once every
    /// worker is launched; call [`Self::join_workers`] to wait for them.
    async fn sync_between(&mut self, start: u64, end: u64) -> SyncResult<()> {
        let total = end.saturating_sub(start);
        if total == 0 {
            return Ok(());
        }

        let per_thread = self.config.blocks_per_thread.max(1);
        let threads = total
            .div_ceil(per_thread)
            .min(self.config.max_queue_threads.max(1) as u64)
            .max(1);
        let slice = total.div_ceil(threads);
        if threads > 1 {
            info!("Launching {} import queue threads...", threads);
        }

        let mut current = start;
        while current < end {
            if current > start {
                self.pause(self.config.worker_launch_pause).await?;
                self.wait_for_queue(self.config.queue_ceiling).await?;
            }
            let slice_end = current.saturating_add(slice).min(end);
            self.spawn_worker(current, slice_end)?;
            current = slice_end;
        }
        Ok(())
    }

    fn spawn_worker(&mut self, start: u64, end: u64) -> SyncResult<()> {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let thread_num = self.queue_threads.len() + 1;
        let handle = thread::Builder::new()
            .name(format!("range-worker-{}", thread_num))
            .spawn(move || {
                let total = end - start;
                let mut submitted = 0u64;
                for block in start..end {
                    if shutdown.load(Ordering::SeqCst) {
                        warn!("[Thread {}] Shutdown requested, stopping at block {}", thread_num, block);
                        break;
                    }
                    match queue.submit(block) {
                        Ok(_) => submitted += 1,
                        Err(e) => error!("[Thread {}] Failed to queue block {}: {}", thread_num, block, e),
                    }
                    if submitted % 100 == 0 || block + 1 == end {
                        debug!(
                            "[Thread {}] Queued {} blocks out of {} blocks to import",
                            thread_num, submitted, total
                        );
                    }
                }
                submitted
            })
            .map_err(|e| SyncError::Queue(format!("Failed to spawn range worker: {}", e)))?;

        self.queue_threads.push(RangeWorker { start, end, handle });
        Ok(())
    }

    /// Wait for every started range worker to finish.
    async fn join_workers(&mut self) -> SyncResult<()> {
        if self.queue_threads.is_empty() {
            return Ok(());
        }
        debug!("Waiting on {} queue threads to finish...", self.queue_threads.len());
        let workers = std::mem::take(&mut self.queue_threads);
        let submitted = tokio::task::spawn_blocking(move || {
            workers
                .into_iter()
                .map(|worker| match worker.handle.join() {
                    Ok(count) => count,
                    Err(_) => {
                        error!("Range worker for blocks {}..{} panicked", worker.start, worker.end);
                        0
                    }
                })
                .sum::<u64>()
        })
        .await
        .map_err(|e| SyncError::Queue(format!("Failed to join range workers: {}", e)))?;
        self.blocks_queued += submitted;
        Ok(())
    }

    /// Block while the queue holds `ceiling` or more pending jobs.
    async fn wait_for_queue(&mut self, ceiling: usize) -> SyncResult<()> {
        loop {
            let depth = match self.queue.pending_count() {
                Ok(depth) => depth,
                Err(e) => {
                    warn!("Could not read queue depth, continuing: {}", e);
                    return Ok(());
                }
            };
            if depth < ceiling {
                return Ok(());
            }
            info!(
                "Queue '{}' currently has {} jobs pending. Pausing until it falls below {}",
                self.queue.name(),
                depth,
                ceiling
            );
            self.renew_held().await?;
            self.pause(self.config.backpressure_poll).await?;
        }
    }

    async fn renew_held(&mut self) -> SyncResult<()> {
        let ttl = self.config.lock_ttl;
        if let Some(session) = self.session_lock.as_mut() {
            session.renew(ttl, false).await?;
        }
        if let Some(gaps) = self.gap_lock.as_mut() {
            gaps.renew(ttl, false).await?;
        }
        Ok(())
    }

    async fn release_gap_lock(&mut self) {
        if let Some(guard) = self.gap_lock.take() {
            let name = guard.name().to_string();
            if let Err(e) = guard.release().await {
                warn!("Failed to release lock {}: {}", name, e);
            }
        }
    }

    /// Sleep for `duration`, waking early with [`SyncError::Aborted`] on shutdown.
    async fn pause(&self, duration: Duration) -> SyncResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check_shutdown()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(PAUSE_SLICE)).await;
        }
    }

    fn check_shutdown(&self) -> SyncResult<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::Aborted("shutdown requested".to_string()));
        }
        Ok(())
    }

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            debug!("Sync state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn reset_counters(&mut self) {
        self.start_block = 0;
        self.end_block = 0;
        self.blocks_queued = 0;
        self.gaps_found = 0;
        self.gaps_filled = 0;
    }
}

fn log_progress(queued: u64, total: u64, remaining: u64, elapsed: Duration) {
    let percent = if total == 0 {
        100.0
    } else {
        queued as f64 / total as f64 * 100.0
    };
    let secs = elapsed.as_secs_f64();
    let bps = if secs > 0.0 { queued as f64 / secs } else { 0.0 };
    info!(
        " >>> Queued {} blocks out of {} blocks to import. {} remaining. Progress: {:.2}%",
        queued, total, remaining, percent
    );
    if bps > 0.0 {
        let eta_secs = (remaining as f64 / bps) as i64;
        info!(
            " >>> Estd. blocks per second {:.2}. Estd. finish in {} seconds ({:.2} hours), at {}",
            bps,
            eta_secs,
            eta_secs as f64 / 3600.0,
            Utc::now() + chrono::Duration::seconds(eta_secs)
        );
    }
}

#[async_trait]
impl<N, S, Q, L> SyncEngine for HistorySync<N, S, Q, L>
where
    N: ChainNodeAdapter + 'static,
    S: HistoryStore + 'static,
    Q: JobQueue + 'static,
    L: LockStore + 'static,
{
    async fn run(&mut self) -> SyncResult<SyncReport> {
        HistorySync::run(self).await
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn status(&self) -> SyncStatus {
        let blocks_per_second = self
            .started_at
            .map(|started| started.elapsed().as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map(|secs| self.blocks_queued as f64 / secs)
            .unwrap_or(0.0);
        SyncStatus {
            state: self.state,
            start_block: self.start_block,
            end_block: self.end_block,
            blocks_queued: self.blocks_queued,
            blocks_per_second,
        }
    }
}

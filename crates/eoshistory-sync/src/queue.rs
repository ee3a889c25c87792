//! In-process job queue
//!
//! [`TaskQueue`] is a named queue drained by a fixed pool of tokio tasks. Each
//! job imports one block under its per-block lock with bounded retries, then
//! hands the result to a [`JobListener`].

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    import_lock_name, BlockImporter, ChainNodeAdapter, HistoryStore, ImportOutcome, JobHandle,
    JobListener, JobQueue, JobReport, LockManager, LockStore, QueueConfig, SyncError, SyncResult,
};

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl JobListener for LoggingListener {
    fn on_success(&self, report: &JobReport) {
        info!(
            "Block {} imported ({} transactions, attempt {}){}",
            report.block_number,
            report.transactions_imported,
            report.attempts,
            if report.newly_imported { "" } else { " [already stored]" }
        );
    }

    fn on_failure(&self, block_number: u64, error: &SyncError) {
        if error.is_conflict() {
            warn!(
                "Database item already exists... Block: {} Error: {}",
                block_number, error
            );
        } else {
            error!(
                "UNHANDLED ERROR importing block {}: {}",
                block_number, error
            );
        }
    }
}

/// Import one block under its per-block lock, retrying retryable errors up to
/// `config.max_retries` times with a fixed delay.
pub async fn run_import_job<N, S, L>(
    importer: &BlockImporter<N, S>,
    locks: &LockManager<L>,
    block_number: u64,
    config: &QueueConfig,
) -> SyncResult<JobReport>
where
    N: ChainNodeAdapter,
    S: HistoryStore,
    L: LockStore + 'static,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match import_locked(importer, locks, block_number, config).await {
            Ok(outcome) => {
                return Ok(JobReport {
                    block_number,
                    timestamp: outcome.block().timestamp,
                    transactions_imported: outcome.transactions_imported(),
                    newly_imported: outcome.was_imported(),
                    attempts,
                })
            }
            Err(e) if e.is_retryable() && attempts <= config.max_retries => {
                warn!(
                    "Import of block {} failed on attempt {}, retrying in {:?}: {}",
                    block_number, attempts, config.retry_delay, e
                );
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn import_locked<N, S, L>(
    importer: &BlockImporter<N, S>,
    locks: &LockManager<L>,
    block_number: u64,
    config: &QueueConfig,
) -> SyncResult<ImportOutcome>
where
    N: ChainNodeAdapter,
    S: HistoryStore,
    L: LockStore + 'static,
{
    let guard = locks
        .acquire(&import_lock_name(block_number), config.block_lock_ttl)
        .await?;
    debug!("Importing block {}", block_number);
    let result = importer.import_block(block_number).await;
    if let Err(e) = guard.release().await {
        warn!("Failed to release import lock for block {}: {}", block_number, e);
    }
    result
}

struct Job {
    id: u64,
    block_number: u64,
}

/// Named queue backed by a pool of tokio worker tasks.
pub struct TaskQueue {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    pending: Arc<AtomicUsize>,
    next_id: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn start<N, S, L>(
        config: QueueConfig,
        importer: BlockImporter<N, S>,
        locks: LockManager<L>,
        listener: Arc<dyn JobListener>,
    ) -> Self
    where
        N: ChainNodeAdapter + 'static,
        S: HistoryStore + 'static,
        L: LockStore + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let config = Arc::new(config);
        let worker_count = config.workers.max(1);

        let workers = (0..worker_count)
            .map(|worker| {
                let receiver = receiver.clone();
                let pending = pending.clone();
                let importer = importer.clone();
                let locks = locks.clone();
                let listener = listener.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        debug!(
                            "Worker {} picked job {} (block {})",
                            worker, job.id, job.block_number
                        );
                        match run_import_job(&importer, &locks, job.block_number, &config).await {
                            Ok(report) => listener.on_success(&report),
                            Err(e) => listener.on_failure(job.block_number, &e),
                        }
                        pending.fetch_sub(1, Ordering::SeqCst);
                    }
                    debug!("Queue worker {} stopped", worker);
                })
            })
            .collect();

        info!(
            "Started queue '{}' with {} workers",
            config.name, worker_count
        );
        Self {
            name: config.name.clone(),
            sender: Mutex::new(Some(sender)),
            pending,
            next_id: AtomicU64::new(1),
            workers: Mutex::new(workers),
        }
    }

    /// Stop accepting jobs, let the workers finish what is queued, and wait
    /// for them to exit.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .map(|mut sender| sender.take())
            .unwrap_or(None);
        drop(sender);

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map(|mut workers| workers.drain(..).collect())
            .unwrap_or_default();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Queue worker panicked: {}", e);
            }
        }
        info!("Queue '{}' shut down", self.name);
    }
}

impl JobQueue for TaskQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, block_number: u64) -> SyncResult<JobHandle> {
        let sender = self
            .sender
            .lock()
            .map_err(|e| SyncError::Queue(format!("Queue lock poisoned: {}", e)))?;
        let sender = sender
            .as_ref()
            .ok_or_else(|| SyncError::Queue(format!("Queue '{}' is shut down", self.name)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(Job { id, block_number }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncError::Queue(format!(
                "Queue '{}' has no running workers",
                self.name
            )));
        }
        Ok(JobHandle {
            id,
            block_number,
            queue: self.name.clone(),
        })
    }

    fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.pending.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{synthetic_block, MemoryLockStore, MemoryStore, MockChainNode};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        successes: Mutex<Vec<JobReport>>,
        failures: Mutex<Vec<(u64, String)>>,
    }

    impl JobListener for Recorder {
        fn on_success(&self, report: &JobReport) {
            self.successes.lock().unwrap().push(report.clone());
        }

        fn on_failure(&self, block_number: u64, error: &SyncError) {
            self.failures.lock().unwrap().push((block_number, error.to_string()));
        }
    }

    fn quick_config() -> QueueConfig {
        QueueConfig {
            name: "test".to_string(),
            workers: 3,
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
            block_lock_ttl: Duration::from_secs(30),
        }
    }

    fn setup() -> (
        Arc<MockChainNode>,
        Arc<MemoryStore>,
        BlockImporter<MockChainNode, MemoryStore>,
        LockManager<MemoryLockStore>,
    ) {
        let node = Arc::new(MockChainNode::new());
        let store = Arc::new(MemoryStore::new());
        let importer = BlockImporter::new(node.clone(), store.clone());
        let locks = LockManager::with_identity(Arc::new(MemoryLockStore::new()), "w@host", "test");
        (node, store, importer, locks)
    }

    #[tokio::test]
    async fn queue_imports_submitted_blocks() {
        let (node, store, importer, locks) = setup();
        for n in 1..=5 {
            node.add_block(synthetic_block(n, 1, 1));
        }
        let recorder = Arc::new(Recorder::default());
        let queue = TaskQueue::start(quick_config(), importer, locks, recorder.clone());

        for n in 1..=5 {
            let handle = queue.submit(n).unwrap();
            assert_eq!(handle.queue, "test");
        }
        queue.shutdown().await;

        assert_eq!(queue.pending_count().unwrap(), 0);
        assert_eq!(store.block_numbers().await.unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(recorder.successes.lock().unwrap().len(), 5);
        assert!(queue.submit(6).is_err());
    }

    #[tokio::test]
    async fn transient_fetch_errors_are_retried() {
        let (node, store, importer, locks) = setup();
        node.add_block(synthetic_block(8, 1, 1));
        node.fail_block(8, 2);

        let report = run_import_job(&importer, &locks, 8, &quick_config()).await.unwrap();
        assert_eq!(report.attempts, 3);
        assert!(report.newly_imported);
        assert!(store.get_block(8).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (node, _store, importer, locks) = setup();
        node.add_block(synthetic_block(8, 1, 1));
        node.fail_block(8, 10);
        let recorder = Arc::new(Recorder::default());
        let queue = TaskQueue::start(quick_config(), importer, locks, recorder.clone());

        queue.submit(8).unwrap();
        queue.shutdown().await;

        assert!(recorder.successes.lock().unwrap().is_empty());
        let failures = recorder.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 8);
        assert_eq!(node.fetch_count(), 3);
    }

    #[tokio::test]
    async fn held_block_lock_delays_import() {
        let (node, _store, importer, locks) = setup();
        node.add_block(synthetic_block(4, 1, 1));
        let guard = locks
            .acquire(&import_lock_name(4), Duration::from_secs(30))
            .await
            .unwrap();

        let config = QueueConfig {
            max_retries: 0,
            ..quick_config()
        };
        let err = run_import_job(&importer, &locks, 4, &config).await.unwrap_err();
        assert!(matches!(err, SyncError::LockContention(_)));

        guard.release().await.unwrap();
        assert!(run_import_job(&importer, &locks, 4, &config).await.is_ok());
    }
}

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use eoshistory::commands::{self, DeleteTarget};
use eoshistory::EosRpcClient;
use eoshistory_rocksdb::{open_database, open_for_inspection, RocksHistoryStore, RocksLockStore};
use eoshistory_sync::{
    default_lock_holder, BlockImporter, HistorySync, LockManager, LoggingListener, QueueConfig,
    StartType, SyncConfig, SyncState, TaskQueue,
};
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(version, about = "EOS block history scanner", long_about = None)]
struct Cli {
    /// Comma separated list of EOS node URLs
    #[arg(long, env = "EOS_NODE", value_delimiter = ',', default_value = "https://eos.greymass.com")]
    node: Vec<String>,
    #[arg(long, env = "EOSHISTORY_DB", default_value = "./eoshistory-db")]
    db_path: PathBuf,
    /// Number of import workers (default: auto-determined based on CPU cores)
    #[arg(long, env = "EOSHISTORY_WORKERS")]
    workers: Option<usize>,
    #[arg(long, default_value_t = 5)]
    max_retries: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue every block between the start and end heights for import
    Sync(SyncArgs),
    /// Import specific blocks right away
    Import {
        #[arg(required = true)]
        blocks: Vec<u64>,
        /// Delete and re-import blocks that already exist
        #[arg(short, long)]
        force: bool,
    },
    /// Delete blocks with their transactions and actions
    Delete {
        blocks: Vec<u64>,
        #[arg(long, allow_negative_numbers = true)]
        start: Option<i64>,
        /// Inclusive
        #[arg(long, allow_negative_numbers = true)]
        end: Option<i64>,
    },
    /// Remove expired locks, then release the named ones
    ClearLock {
        #[arg(required = true)]
        names: Vec<String>,
    },
    ListLocks,
    /// Remove every lock
    ResetLocks {
        #[arg(long)]
        yes: bool,
    },
    /// Delete all rows of blocks, transactions or actions
    ClearTable { table: String },
    /// Show missing block ranges
    Gaps {
        #[arg(long)]
        include_zero: bool,
    },
}

#[derive(Args, Debug)]
struct SyncArgs {
    #[arg(long)]
    start_block: Option<u64>,
    /// exact, or relative to the chain head
    #[arg(long, default_value = "exact")]
    start_type: String,
    #[arg(long)]
    end_block: Option<u64>,
    /// Treat --end-block as a number of blocks after the start
    #[arg(long)]
    relative_end: bool,
    #[arg(short = 'g', long)]
    skip_gaps: bool,
    #[arg(short = 'k', long)]
    gaps_only: bool,
    #[arg(short, long, env = "DEFAULT_QUEUE", default_value = "celery")]
    queue: String,
    #[arg(long, env = "EOSHISTORY_LOCK_OWNER", default_value = "eoshistory")]
    lock_owner: String,
    /// Maximum range-worker threads per chunk
    #[arg(long)]
    max_threads: Option<usize>,
    #[arg(long, default_value_t = 1000)]
    blocks_per_thread: u64,
    /// Blocks queued per chunk
    #[arg(long, default_value_t = 10_000)]
    chunk_size: u64,
    /// Pending jobs at which queueing pauses
    #[arg(long, default_value_t = 10_000)]
    queue_ceiling: usize,
}

impl SyncArgs {
    fn to_config(&self) -> Result<SyncConfig> {
        let start_type: StartType = self.start_type.parse()?;
        if self.skip_gaps && self.gaps_only {
            return Err(anyhow!("--skip-gaps and --gaps-only cannot be combined"));
        }
        let mut config = SyncConfig {
            start_block: self.start_block,
            start_type,
            end_block: self.end_block,
            relative_end: self.relative_end,
            skip_gaps: self.skip_gaps,
            gaps_only: self.gaps_only,
            lock_owner: self.lock_owner.clone(),
            blocks_per_thread: self.blocks_per_thread.max(1),
            max_in_flight: self.chunk_size.max(1),
            queue_ceiling: self.queue_ceiling.max(1),
            ..Default::default()
        };
        if let Some(threads) = self.max_threads {
            config.max_queue_threads = threads.max(1);
        }
        Ok(config)
    }
}

async fn setup_signal_handler() -> Arc<AtomicBool> {
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let shutdown_requested_clone = shutdown_requested.clone();

    tokio::spawn(async move {
        loop {
            match signal::ctrl_c().await {
                Ok(()) => {
                    if shutdown_requested_clone.load(Ordering::SeqCst) {
                        println!("\nForce exit requested - terminating immediately!");
                        std::process::exit(1);
                    } else {
                        println!("\nShutdown signal received - stopping after queued work...");
                        println!("Press Ctrl-C again to force exit");
                        shutdown_requested_clone.store(true, Ordering::SeqCst);

                        let timeout_shutdown = shutdown_requested_clone.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                            if timeout_shutdown.load(Ordering::SeqCst) {
                                println!("\nGraceful shutdown timeout - forcing exit");
                                std::process::exit(1);
                            }
                        });
                    }
                }
                Err(err) => {
                    eprintln!("Error setting up signal handler: {}", err);
                    break;
                }
            }
        }
    });

    shutdown_requested
}

fn queue_config(cli: &Cli, name: &str) -> QueueConfig {
    let mut config = QueueConfig {
        name: name.to_string(),
        max_retries: cli.max_retries,
        ..Default::default()
    };
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }
    config
}

async fn run_sync(cli: &Cli, args: &SyncArgs) -> Result<()> {
    let config = args.to_config()?;
    let shutdown = setup_signal_handler().await;

    let mut stdout = std::io::stdout();
    commands::print_banner(&mut stdout)?;
    info!("System has {} CPU cores available", num_cpus::get());
    info!("Press Ctrl-C to stop queueing, Ctrl-C again to force exit");

    let db = open_database(&cli.db_path)?;
    let node = Arc::new(EosRpcClient::new(cli.node.clone())?);
    let store = Arc::new(RocksHistoryStore::new(db.clone()));
    let locks = LockManager::new(Arc::new(RocksLockStore::new(db)));
    info!("Using EOS nodes: {}", node.urls().join(", "));

    let importer = BlockImporter::new(node.clone(), store.clone());
    let queue = Arc::new(TaskQueue::start(
        queue_config(cli, &args.queue),
        importer,
        locks.clone(),
        Arc::new(LoggingListener),
    ));

    let mut sync = HistorySync::new(node, store, queue.clone(), locks, config).with_shutdown(shutdown.clone());
    let result = sync.run().await;

    if !shutdown.load(Ordering::SeqCst) {
        info!("Waiting for queued imports to finish");
    }
    queue.shutdown().await;

    let report = result?;
    println!("Sync finished: {}", report.state);
    println!("  Blocks:        {} to {}", report.start_block, report.end_block);
    println!("  Blocks queued: {}", report.blocks_queued);
    println!("  Gaps:          {} found, {} filled", report.gaps_found, report.gaps_filled);
    println!("  Elapsed:       {:.1}s", report.elapsed.as_secs_f64());
    if report.state == SyncState::Aborted {
        return Err(anyhow!("Sync was interrupted"));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut stdout = std::io::stdout();
    match &cli.command {
        Command::Sync(args) => run_sync(&cli, args).await,
        Command::Import { blocks, force } => {
            let db = open_database(&cli.db_path)?;
            let node = Arc::new(EosRpcClient::new(cli.node.clone())?);
            let importer = BlockImporter::new(node, Arc::new(RocksHistoryStore::new(db.clone())));
            let locks = LockManager::new(Arc::new(RocksLockStore::new(db)));
            let config = queue_config(&cli, "import");
            commands::import_blocks(&importer, &locks, &config, blocks, *force, &mut stdout).await?;
            Ok(())
        }
        Command::Delete { blocks, start, end } => {
            let target = DeleteTarget::from_args(blocks.clone(), *start, *end)?;
            let store = RocksHistoryStore::new(open_database(&cli.db_path)?);
            commands::delete_blocks(&store, &target, &mut stdout).await?;
            Ok(())
        }
        Command::ClearLock { names } => {
            let locks = LockManager::new(Arc::new(RocksLockStore::new(open_database(&cli.db_path)?)));
            commands::clear_locks(&locks, names, &mut stdout).await?;
            Ok(())
        }
        Command::ListLocks => {
            // Expired rows are only purged when no sync holds the database
            let (db, writable) = open_for_inspection(&cli.db_path)?;
            let locks = LockManager::new(Arc::new(RocksLockStore::new(db)));
            commands::list_locks(&locks, writable, &mut stdout).await?;
            Ok(())
        }
        Command::ResetLocks { yes } => {
            let locks = LockManager::new(Arc::new(RocksLockStore::new(open_database(&cli.db_path)?)));
            let mut input = std::io::stdin().lock();
            commands::reset_locks(&locks, *yes, &mut input, &mut stdout).await?;
            Ok(())
        }
        Command::ClearTable { table } => {
            let store = RocksHistoryStore::new(open_database(&cli.db_path)?);
            commands::clear_table(&store, table, &mut stdout).await?;
            Ok(())
        }
        Command::Gaps { include_zero } => {
            let (db, _) = open_for_inspection(&cli.db_path)?;
            let store = RocksHistoryStore::new(db);
            commands::print_gaps(&store, *include_zero, &mut stdout).await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder().format_timestamp_secs().init();
    let cli = Cli::parse();
    info!("Lock holder: {}", default_lock_holder());

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

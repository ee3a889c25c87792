//! RocksDB persistence for eoshistory
//!
//! Provides a [`RocksHistoryStore`] for blocks, transactions and actions and a
//! [`RocksLockStore`] for distributed lock rows. Both share one database.

pub mod keys;
pub mod locks;
pub mod store;

pub use locks::RocksLockStore;
pub use store::RocksHistoryStore;

use log::{info, warn};
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::Arc;

use eoshistory_sync::{SyncError, SyncResult};

/// Options tuned for the bursty, write-heavy import workload.
pub fn default_options() -> Options {
    let mut opts = Options::default();

    let available_cpus = num_cpus::get();
    let background_jobs = std::cmp::min(std::cmp::max(4, available_cpus / 4), 16) as i32;
    let write_buffer_number = std::cmp::min(std::cmp::max(4, available_cpus / 6), 8) as i32;

    opts.create_if_missing(true);
    opts.set_max_open_files(10000);
    opts.set_use_fsync(false);
    opts.set_bytes_per_sync(8 * 1024 * 1024);
    opts.set_max_write_buffer_number(write_buffer_number);
    opts.set_write_buffer_size(64 * 1024 * 1024);
    opts.set_max_background_jobs(background_jobs);
    opts
}

/// Open (creating if needed) the database at `path`.
///
/// RocksDB lets one process at a time open a database for writing. Finding
/// it already open is reported as [`SyncError::LockContention`] on the path.
pub fn open_database<P: AsRef<Path>>(path: P) -> SyncResult<Arc<DB>> {
    let path = path.as_ref();
    let db = DB::open(&default_options(), path).map_err(|e| open_error(path, e))?;
    info!("Opened database at {}", path.display());
    Ok(Arc::new(db))
}

/// Open an existing database without taking its write lock, e.g. to inspect
/// it while a sync is running. Writes through the handle fail.
pub fn open_read_only<P: AsRef<Path>>(path: P) -> SyncResult<Arc<DB>> {
    let path = path.as_ref();
    let mut opts = default_options();
    opts.create_if_missing(false);
    let db = DB::open_for_read_only(&opts, path, false).map_err(|e| {
        SyncError::Storage(format!(
            "Failed to open database at {} read-only: {}",
            path.display(),
            e
        ))
    })?;
    info!("Opened database at {} read-only", path.display());
    Ok(Arc::new(db))
}

/// Open the database for commands that only read it. Falls back to a
/// read-only handle while another process holds it; the flag tells whether
/// the returned handle is writable.
pub fn open_for_inspection<P: AsRef<Path>>(path: P) -> SyncResult<(Arc<DB>, bool)> {
    let path = path.as_ref();
    match open_database(path) {
        Ok(db) => Ok((db, true)),
        Err(SyncError::LockContention(_)) => {
            warn!(
                "Database at {} is in use by another process, opening it read-only",
                path.display()
            );
            Ok((open_read_only(path)?, false))
        }
        Err(e) => Err(e),
    }
}

fn open_error(path: &Path, error: rocksdb::Error) -> SyncError {
    if is_lock_error(&error.to_string()) {
        SyncError::LockContention(format!("database {}", path.display()))
    } else {
        SyncError::Storage(format!("Failed to open database at {}: {}", path.display(), error))
    }
}

/// Whether an open failure means another handle holds the database LOCK file.
fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("io error") && message.contains("lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RocksLockStore;
    use eoshistory_sync::{LockManager, LockStore};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn recognizes_lock_file_errors() {
        assert!(is_lock_error(
            "IO error: While lock file: /tmp/db/LOCK: Resource temporarily unavailable"
        ));
        assert!(is_lock_error(
            "IO error: lock hold by current process, acquire time 1700000000 acquiring thread 1: /tmp/db/LOCK: No locks available"
        ));
        assert!(!is_lock_error("Corruption: bad block contents"));
    }

    #[test]
    fn second_open_is_lock_contention() {
        let dir = TempDir::new().unwrap();
        let _first = open_database(dir.path()).unwrap();
        match open_database(dir.path()) {
            Err(SyncError::LockContention(name)) => {
                assert!(name.contains(&dir.path().display().to_string()))
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("database opened twice"),
        }
    }

    #[tokio::test]
    async fn read_only_handle_sees_locks_of_running_writer() {
        let dir = TempDir::new().unwrap();
        let db = open_database(dir.path()).unwrap();
        let locks = LockManager::with_identity(Arc::new(RocksLockStore::new(db)), "sync@host", "pid 1");
        let _session = locks
            .acquire("eoshist_sync:celery:eoshistory", Duration::from_secs(60))
            .await
            .unwrap();

        let reader = RocksLockStore::new(open_read_only(dir.path()).unwrap());
        let listed = reader.list_locks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].locked_by, "sync@host");
        assert!(reader.delete_lock("eoshist_sync:celery:eoshistory").await.is_err());
    }

    #[test]
    fn inspection_falls_back_to_read_only_while_held() {
        let dir = TempDir::new().unwrap();
        {
            let (_db, writable) = open_for_inspection(dir.path()).unwrap();
            assert!(writable);
        }
        let _writer = open_database(dir.path()).unwrap();
        let (_db, writable) = open_for_inspection(dir.path()).unwrap();
        assert!(!writable);
    }
}

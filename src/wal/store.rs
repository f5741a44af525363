//! WAL-backed reliable storage.
//!
//! Commits are appended to a local durable log and acknowledged immediately;
//! a background drainer ferries the rows to the remote store. Reads overlay
//! pending rows on top of the remote, so a committed write is visible to the
//! writer before (and after) it lands remotely.

use crate::cancel::CancelToken;
use crate::error::StorageError;
use crate::storage::{ObjectStorage, ReliableStorage, WriteData};
use crate::telemetry::{self, SharedMetricsRegistry};
use crate::wal::drain;
use crate::wal::frame::{WalRecord, WalRow, MAX_KEY_LEN};
use crate::wal::log::LogWriter;
use crate::wal::replay;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

const COUNT_CACHE_TTL: Duration = Duration::from_secs(10);
const BACKPRESSURE_RECHECK: Duration = Duration::from_secs(1);

/// Configuration for [`LocalWal`].
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Location of the log file. The parent directory is created if missing.
    pub path: PathBuf,
    /// Soft bound on buffered entries: `start` blocks new sessions while the
    /// table holds more than this many rows. Commits themselves never block
    /// on size.
    pub max_entries: usize,
    /// Concurrent remote writes per drain pass.
    pub parallelism: usize,
}

impl WalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: 32 * 1024,
            parallelism: 16,
        }
    }
}

/// Reliable storage over a remote [`ObjectStorage`], buffered through a local
/// write-ahead log.
///
/// Dropping the handle stops the drainer; rows still buffered at that point
/// are replayed on the next open.
pub struct LocalWal {
    shared: Arc<WalShared>,
    max_entries: usize,
    drainer: Option<thread::JoinHandle<()>>,
}

pub(crate) struct WalShared {
    pub(crate) remote: Arc<dyn ObjectStorage>,
    pub(crate) state: Mutex<WalState>,
    pub(crate) metrics: SharedMetricsRegistry,
    pub(crate) parallelism: usize,
    gauge_name: String,
    size_cache: Mutex<SizeCache>,
    wake_tx: SyncSender<()>,
    shutdown: AtomicBool,
}

pub(crate) struct WalState {
    pub(crate) log: LogWriter,
    rows: BTreeMap<u64, WalRow>,
    by_key: HashMap<String, u64>,
    next_id: u64,
}

#[derive(Default)]
struct SizeCache {
    size: usize,
    refreshed_at: Option<Instant>,
}

impl LocalWal {
    /// Opens (or creates) the log at `config.path`, replays any pending rows,
    /// and starts the background drainer.
    pub fn open(
        remote: Arc<dyn ObjectStorage>,
        config: WalConfig,
        metrics: SharedMetricsRegistry,
    ) -> Result<Self, StorageError> {
        let replayed = replay::scan(&config.path).map_err(map_replay_err)?;
        if let Some(truncation) = &replayed.truncation {
            warn!(
                "event=wal_replay_truncated path={} offset={} truncated_bytes={} error={}",
                config.path.display(),
                truncation.offset,
                truncation.truncated_bytes,
                truncation.error
            );
        }
        replayed.enforce_truncation().map_err(map_replay_err)?;

        let log = LogWriter::open(&config.path).map_err(map_log_err)?;
        let mut rows = BTreeMap::new();
        let mut by_key = HashMap::new();
        for row in replayed.rows {
            by_key.insert(row.key.clone(), row.id);
            rows.insert(row.id, row);
        }
        info!(
            "event=wal_open path={} rows={} next_id={}",
            config.path.display(),
            rows.len(),
            replayed.next_id
        );

        let gauge_name =
            telemetry::labeled("local_wal_size", "path", &config.path.display().to_string());
        metrics.set_gauge(gauge_name.clone(), rows.len() as u64);

        let (wake_tx, wake_rx) = mpsc::sync_channel(1);
        let shared = Arc::new(WalShared {
            remote,
            state: Mutex::new(WalState {
                log,
                rows,
                by_key,
                next_id: replayed.next_id,
            }),
            metrics,
            parallelism: config.parallelism.max(1),
            gauge_name,
            size_cache: Mutex::new(SizeCache::default()),
            wake_tx,
            shutdown: AtomicBool::new(false),
        });

        let drainer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("wal-drain".into())
                .spawn(move || drain::run(shared, wake_rx))
                .map_err(StorageError::Io)?
        };

        Ok(Self {
            shared,
            max_entries: config.max_entries,
            drainer: Some(drainer),
        })
    }

    /// Number of rows currently buffered. Served from a cache refreshed at
    /// most every ten seconds; refreshing also updates the exported
    /// `local_wal_size` gauge.
    pub fn count(&self) -> Result<usize, StorageError> {
        self.shared.count()
    }
}

impl ReliableStorage for LocalWal {
    fn start(
        &self,
        cancel: &CancelToken,
        prefetch: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        // Block until the table has drained enough to admit new sessions.
        loop {
            let count = self.shared.count()?;
            if count <= self.max_entries {
                return self.get_many(prefetch);
            }
            self.shared.wake_drainer();
            if cancel.wait_timeout(BACKPRESSURE_RECHECK) {
                return Err(StorageError::Cancelled);
            }
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        {
            let state = lock_or_poison(&self.shared.state, "wal state")?;
            if let Some(row) = state.row_for_key(key) {
                if row.value.is_empty() {
                    // Pending delete shadows whatever the remote still holds.
                    return Err(StorageError::NotFound);
                }
                return Ok(row.value.clone());
            }
        }
        self.shared.remote.get(key)
    }

    fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        let mut out = HashMap::new();
        for key in keys {
            match self.get(key) {
                Ok(value) => {
                    out.insert(key.clone(), value);
                }
                Err(StorageError::NotFound) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    fn commit(&self, writes: HashMap<String, WriteData>) -> Result<(), StorageError> {
        if writes.is_empty() {
            return Ok(());
        }
        for key in writes.keys() {
            if key.len() > MAX_KEY_LEN {
                return Err(StorageError::WalWrite(format!(
                    "key length {} exceeds maximum {}",
                    key.len(),
                    MAX_KEY_LEN
                )));
            }
        }

        let mut state = lock_or_poison(&self.shared.state, "wal state")?;
        let mut id = state.next_id;
        let mut rows = Vec::with_capacity(writes.len());
        for (key, write) in writes {
            rows.push(WalRow {
                id,
                key,
                value: write.value,
                data_type: write.data_type,
            });
            id += 1;
        }

        // One frame per batch: the append is all-or-nothing, so the batch is
        // either fully in the WAL or not at all.
        let frame = WalRecord::Commit(rows.clone()).encode();
        state.log.append(&frame).map_err(|err| {
            warn!("event=wal_commit_failed rows={} error={}", rows.len(), err);
            StorageError::WalWrite(err.to_string())
        })?;
        state.next_id = id;
        for row in rows {
            if let Some(prior) = state.by_key.insert(row.key.clone(), row.id) {
                state.rows.remove(&prior);
            }
            state.rows.insert(row.id, row);
        }
        Ok(())
    }
}

impl Drop for LocalWal {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake_drainer();
        if let Some(handle) = self.drainer.take() {
            let _ = handle.join();
        }
    }
}

impl WalShared {
    pub(crate) fn count(&self) -> Result<usize, StorageError> {
        {
            let cache = lock_or_poison(&self.size_cache, "wal size cache")?;
            if let Some(at) = cache.refreshed_at {
                if at.elapsed() < COUNT_CACHE_TTL {
                    return Ok(cache.size);
                }
            }
        }
        self.refresh_count()
    }

    /// Re-reads the live size, bypassing the cache TTL. The drainer calls
    /// this after every pass so backpressure releases promptly.
    pub(crate) fn refresh_count(&self) -> Result<usize, StorageError> {
        let size = lock_or_poison(&self.state, "wal state")?.rows.len();
        let mut cache = lock_or_poison(&self.size_cache, "wal size cache")?;
        cache.size = size;
        cache.refreshed_at = Some(Instant::now());
        self.metrics.set_gauge(self.gauge_name.clone(), size as u64);
        Ok(size)
    }

    /// Nudges the drainer. Non-blocking: a full buffer means a wake is
    /// already pending, and the five-second tick guarantees progress anyway.
    pub(crate) fn wake_drainer(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl WalState {
    fn row_for_key(&self, key: &str) -> Option<&WalRow> {
        self.by_key.get(key).and_then(|id| self.rows.get(id))
    }

    /// Snapshot of the oldest rows in commit order.
    pub(crate) fn oldest_rows(&self, limit: usize) -> Vec<WalRow> {
        self.rows.values().take(limit).cloned().collect()
    }

    pub(crate) fn remove_ids(&mut self, ids: &[u64]) {
        for id in ids {
            if let Some(row) = self.rows.remove(id) {
                self.by_key.remove(&row.key);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub(crate) fn lock_or_poison<'a, T>(
    mutex: &'a Mutex<T>,
    context: &'static str,
) -> Result<MutexGuard<'a, T>, StorageError> {
    mutex
        .lock()
        .map_err(|_| StorageError::InvariantViolation(format!("{context} lock poisoned")))
}

fn map_replay_err(err: crate::wal::replay::ReplayError) -> StorageError {
    match err {
        crate::wal::replay::ReplayError::Io(io) => StorageError::Io(io),
    }
}

fn map_log_err(err: crate::wal::log::LogError) -> StorageError {
    match err {
        crate::wal::log::LogError::Io(io) => StorageError::Io(io),
    }
}

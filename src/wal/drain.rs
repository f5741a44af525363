//! Background drain loop.
//!
//! Ferries buffered rows to the remote store in id order: non-empty values
//! become remote sets, tombstones become remote deletes. A batch is only
//! removed from the table once every row in it has been acknowledged by the
//! remote; a failed pass leaves the table untouched and the next wake
//! retries.

use crate::error::StorageError;
use crate::wal::frame::{WalRecord, WalRow};
use crate::wal::store::{lock_or_poison, WalShared};
use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const DRAIN_TICK: Duration = Duration::from_secs(5);
const DRAIN_BATCH_ROWS: usize = 100;

pub(crate) fn run(shared: Arc<WalShared>, wake_rx: Receiver<()>) {
    loop {
        match wake_rx.recv_timeout(DRAIN_TICK) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
        if shared.is_shutdown() {
            return;
        }
        if let Err(err) = drain_once(&shared) {
            shared.metrics.inc_counter("local_wal_drain_errors", 1);
            warn!("event=wal_drain_error error={err}");
        }
        if let Err(err) = shared.refresh_count() {
            warn!("event=wal_count_error error={err}");
        }
    }
}

/// Drains batches until the table is empty within this invocation. Any
/// failure aborts the invocation; rows stay buffered for the next wake.
fn drain_once(shared: &WalShared) -> Result<(), StorageError> {
    loop {
        let batch = lock_or_poison(&shared.state, "wal state")?.oldest_rows(DRAIN_BATCH_ROWS);
        if batch.is_empty() {
            return Ok(());
        }

        if let Some(err) = flush_batch(shared, &batch) {
            return Err(err);
        }

        let ids: Vec<u64> = batch.iter().map(|row| row.id).collect();
        {
            let mut state = lock_or_poison(&shared.state, "wal state")?;
            // The marker must be durable before the rows disappear from the
            // table; a crash in between merely re-sends an idempotent batch.
            let frame = WalRecord::Drained(ids.clone()).encode();
            state
                .log
                .append(&frame)
                .map_err(|err| StorageError::WalWrite(err.to_string()))?;
            state.remove_ids(&ids);
            if state.is_empty() {
                state
                    .log
                    .reset()
                    .map_err(|err| StorageError::WalWrite(err.to_string()))?;
                info!("event=wal_log_truncated path={}", state.log.path().display());
            }
        }
        shared
            .metrics
            .inc_counter("local_wal_drained_entries", batch.len() as u64);
        debug!("event=wal_drain_pass rows={}", batch.len());
    }
}

/// Fans the batch out to the worker pool and collects one completion per
/// row. All completions are awaited even after a failure: aborting early
/// would leave in-flight remote operations whose success could not be
/// acknowledged. Returns the last error observed, if any.
fn flush_batch(shared: &WalShared, batch: &[WalRow]) -> Option<StorageError> {
    let workers = shared.parallelism.min(batch.len()).max(1);
    let (req_tx, req_rx) = mpsc::sync_channel::<WalRow>(batch.len());
    for row in batch {
        // Capacity equals the batch size, so staging never blocks.
        let _ = req_tx.send(row.clone());
    }
    drop(req_tx);
    let req_rx = Arc::new(Mutex::new(req_rx));
    let (done_tx, done_rx) = mpsc::channel::<Result<(), StorageError>>();

    let mut failure = None;
    thread::scope(|scope| {
        for _ in 0..workers {
            let req_rx = Arc::clone(&req_rx);
            let done_tx = done_tx.clone();
            let remote = &shared.remote;
            scope.spawn(move || loop {
                let row = match req_rx.lock() {
                    Ok(rx) => rx.try_recv().ok(),
                    Err(_) => None,
                };
                let Some(row) = row else { break };
                let result = if row.value.is_empty() {
                    remote.delete(&row.key)
                } else {
                    remote.set(&row.key, &row.value, row.data_type)
                };
                if done_tx.send(result).is_err() {
                    break;
                }
            });
        }
        drop(done_tx);

        for _ in 0..batch.len() {
            match done_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failure = Some(err),
                Err(_) => {
                    failure = Some(StorageError::InvariantViolation(
                        "drain worker exited before completing its batch".into(),
                    ));
                    break;
                }
            }
        }
    });
    failure
}

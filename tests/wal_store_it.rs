mod support;

use blockferry::{
    labeled, CancelToken, DataType, LocalWal, ReliableStorage, SharedMetricsRegistry,
    StorageError, WalConfig, WriteData,
};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use support::MemoryRemote;
use tempfile::{tempdir, TempDir};

fn wal_path(dir: &TempDir) -> PathBuf {
    dir.path().join("wal.log")
}

fn writes(entries: &[(&str, &[u8])]) -> HashMap<String, WriteData> {
    entries
        .iter()
        .map(|(key, value)| {
            (
                key.to_string(),
                WriteData::new(value.to_vec(), DataType::Content),
            )
        })
        .collect()
}

/// Drives the drainer to completion by opening a session with a zero-entry
/// admission bound.
fn drain_fully(wal: &LocalWal) {
    wal.start(&CancelToken::new(), &[]).unwrap();
}

#[test]
fn committed_writes_overlay_the_remote() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    remote.insert("k", b"old", DataType::Content);
    let config = WalConfig {
        max_entries: 0,
        ..WalConfig::new(wal_path(&dir))
    };
    let wal = LocalWal::open(remote.clone(), config, SharedMetricsRegistry::new()).unwrap();

    wal.commit(writes(&[("k", b"new")])).unwrap();
    assert_eq!(wal.get("k").unwrap(), b"new");
    assert_eq!(remote.value("k").unwrap(), b"old");

    drain_fully(&wal);
    assert_eq!(remote.value("k").unwrap(), b"new");
    assert_eq!(wal.count().unwrap(), 0);
    // Read-your-writes holds after the row moves to the remote.
    assert_eq!(wal.get("k").unwrap(), b"new");
}

#[test]
fn tombstone_shadows_the_remote_value() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    remote.insert("k", b"v", DataType::Content);
    let wal = LocalWal::open(
        remote.clone(),
        WalConfig::new(wal_path(&dir)),
        SharedMetricsRegistry::new(),
    )
    .unwrap();

    let mut batch = HashMap::new();
    batch.insert("k".to_string(), WriteData::tombstone(DataType::Content));
    wal.commit(batch).unwrap();
    assert!(matches!(wal.get("k"), Err(StorageError::NotFound)));
    assert_eq!(remote.value("k").unwrap(), b"v");
}

#[test]
fn empty_commit_is_a_no_op() {
    let dir = tempdir().unwrap();
    let path = wal_path(&dir);
    let wal = LocalWal::open(
        Arc::new(MemoryRemote::new()),
        WalConfig::new(&path),
        SharedMetricsRegistry::new(),
    )
    .unwrap();
    wal.commit(HashMap::new()).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(wal.count().unwrap(), 0);
}

#[test]
fn get_many_omits_missing_keys() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    remote.insert("remote-only", b"r", DataType::Content);
    let wal = LocalWal::open(
        remote,
        WalConfig::new(wal_path(&dir)),
        SharedMetricsRegistry::new(),
    )
    .unwrap();
    wal.commit(writes(&[("pending", b"p")])).unwrap();

    let keys = vec![
        "pending".to_string(),
        "remote-only".to_string(),
        "absent".to_string(),
    ];
    let out = wal.get_many(&keys).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out["pending"], b"p");
    assert_eq!(out["remote-only"], b"r");
    assert!(!out.contains_key("absent"));
}

#[test]
fn start_prefetches_and_tolerates_misses() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    remote.insert("warm", b"w", DataType::Content);
    let wal = LocalWal::open(
        remote,
        WalConfig::new(wal_path(&dir)),
        SharedMetricsRegistry::new(),
    )
    .unwrap();

    let cancel = CancelToken::new();
    let empty = wal.start(&cancel, &[]).unwrap();
    assert!(empty.is_empty());

    let out = wal
        .start(&cancel, &["warm".to_string(), "cold".to_string()])
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out["warm"], b"w");
}

#[test]
fn recommitting_a_key_keeps_only_the_latest_row() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let config = WalConfig {
        max_entries: 0,
        ..WalConfig::new(wal_path(&dir))
    };
    let wal = LocalWal::open(remote.clone(), config, SharedMetricsRegistry::new()).unwrap();

    wal.commit(writes(&[("k", b"first")])).unwrap();
    wal.commit(writes(&[("k", b"second")])).unwrap();
    assert_eq!(wal.count().unwrap(), 1);
    assert_eq!(wal.get("k").unwrap(), b"second");

    drain_fully(&wal);
    assert_eq!(remote.set_calls(), 1);
    assert_eq!(remote.value("k").unwrap(), b"second");
}

#[test]
fn gauge_tracks_the_pending_row_count() {
    let dir = tempdir().unwrap();
    let path = wal_path(&dir);
    let metrics = SharedMetricsRegistry::new();
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_all_sets(true);
    let wal = LocalWal::open(remote, WalConfig::new(&path), metrics.clone()).unwrap();

    wal.commit(writes(&[("a", b"1"), ("b", b"2")])).unwrap();
    assert_eq!(wal.count().unwrap(), 2);
    let gauge = labeled("local_wal_size", "path", &path.display().to_string());
    assert_eq!(metrics.snapshot().gauges.get(&gauge), Some(&2));
}

#[test]
fn backpressure_admits_sessions_once_drained() {
    let dir = tempdir().unwrap();
    let path = wal_path(&dir);
    let metrics = SharedMetricsRegistry::new();
    let remote = Arc::new(MemoryRemote::new());
    let config = WalConfig {
        max_entries: 0,
        ..WalConfig::new(&path)
    };
    let wal = LocalWal::open(remote.clone(), config, metrics.clone()).unwrap();

    wal.commit(writes(&[("a", b"1"), ("b", b"2"), ("c", b"3")]))
        .unwrap();
    // Admission must not return before the drainer has cleared the backlog.
    wal.start(&CancelToken::new(), &[]).unwrap();
    assert_eq!(remote.len(), 3);
    assert_eq!(wal.count().unwrap(), 0);

    let gauge = labeled("local_wal_size", "path", &path.display().to_string());
    assert_eq!(metrics.snapshot().gauges.get(&gauge), Some(&0));
}

#[test]
fn cancelled_session_stops_waiting_for_admission() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_all_sets(true);
    let config = WalConfig {
        max_entries: 0,
        ..WalConfig::new(wal_path(&dir))
    };
    let wal = LocalWal::open(remote, config, SharedMetricsRegistry::new()).unwrap();
    wal.commit(writes(&[("stuck", b"v")])).unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });
    let result = wal.start(&cancel, &[]);
    canceller.join().unwrap();
    assert!(matches!(result, Err(StorageError::Cancelled)));
}

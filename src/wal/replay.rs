//! Startup scan of the WAL log.
//!
//! Replays `Commit` and `Drained` records in order to rebuild the live table.
//! A record that fails to decode marks the end of usable history: commits are
//! only acknowledged after a durable append, so bytes past that point belong
//! to an unacknowledged write and are truncated away.

use crate::wal::frame::{FrameError, WalRecord, WalRow};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug)]
pub(crate) struct ReplayResult {
    /// Live rows in id order.
    pub rows: Vec<WalRow>,
    /// One past the highest id ever observed, or 1 for an empty log.
    pub next_id: u64,
    pub truncation: Option<Truncation>,
}

#[derive(Debug, Clone)]
pub(crate) struct Truncation {
    pub path: PathBuf,
    pub offset: u64,
    pub truncated_bytes: u64,
    pub error: FrameError,
}

impl ReplayResult {
    pub(crate) fn enforce_truncation(&self) -> Result<(), ReplayError> {
        if let Some(truncation) = &self.truncation {
            let file = OpenOptions::new().write(true).open(&truncation.path)?;
            file.set_len(truncation.offset)?;
            file.sync_data()?;
        }
        Ok(())
    }
}

pub(crate) fn scan(path: &Path) -> Result<ReplayResult, ReplayError> {
    let mut buf = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut buf)?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let mut rows: BTreeMap<u64, WalRow> = BTreeMap::new();
    let mut by_key: HashMap<String, u64> = HashMap::new();
    let mut next_id = 1u64;
    let mut truncation = None;
    let mut cursor = 0usize;
    while cursor < buf.len() {
        match WalRecord::decode(&buf, cursor) {
            Ok((record, next_cursor)) => {
                apply(record, &mut rows, &mut by_key, &mut next_id);
                cursor = next_cursor;
            }
            Err(error) => {
                truncation = Some(Truncation {
                    path: path.to_path_buf(),
                    offset: cursor as u64,
                    truncated_bytes: (buf.len() - cursor) as u64,
                    error,
                });
                break;
            }
        }
    }

    Ok(ReplayResult {
        rows: rows.into_values().collect(),
        next_id,
        truncation,
    })
}

fn apply(
    record: WalRecord,
    rows: &mut BTreeMap<u64, WalRow>,
    by_key: &mut HashMap<String, u64>,
    next_id: &mut u64,
) {
    match record {
        WalRecord::Commit(batch) => {
            for row in batch {
                if let Some(prior) = by_key.insert(row.key.clone(), row.id) {
                    rows.remove(&prior);
                }
                *next_id = (*next_id).max(row.id + 1);
                rows.insert(row.id, row);
            }
        }
        WalRecord::Drained(ids) => {
            for id in ids {
                if let Some(row) = rows.remove(&id) {
                    by_key.remove(&row.key);
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

//! Append-only log file backing the WAL table.

use log::warn;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

const LOG_IO_MAX_ATTEMPTS: usize = 3;
const LOG_IO_BACKOFF: Duration = Duration::from_millis(20);

/// Appender enforcing write → flush → `fdatasync` ordering. A record is
/// durable once `append` returns.
#[derive(Debug)]
pub(crate) struct LogWriter {
    path: PathBuf,
    file: File,
    cursor: u64,
}

impl LogWriter {
    pub(crate) fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        let cursor = file.seek(SeekFrom::End(0))?;
        Ok(Self { path, file, cursor })
    }

    pub(crate) fn append(&mut self, payload: &[u8]) -> Result<(), LogError> {
        let label = format!("wal_append path={}", self.path.display());
        retry_io(|| self.file.write_all(payload), &label)?;
        retry_io(|| self.file.flush(), "wal_flush")?;
        retry_io(|| self.file.sync_data(), "wal_sync")?;
        self.cursor = self.cursor.saturating_add(payload.len() as u64);
        Ok(())
    }

    /// Truncates the log to zero length. Called once the table has fully
    /// drained; the next append starts a fresh history.
    pub(crate) fn reset(&mut self) -> Result<(), LogError> {
        retry_io(|| self.file.set_len(0), "wal_truncate")?;
        self.file.seek(SeekFrom::Start(0))?;
        retry_io(|| self.file.sync_data(), "wal_sync")?;
        self.cursor = 0;
        Ok(())
    }

    pub(crate) fn len(&self) -> u64 {
        self.cursor
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates the log's parent directory if missing (mode 0744 on Unix).
pub(crate) fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o744);
    }
    builder.create(parent)
}

/// Runs `op`, absorbing `Interrupted` a bounded number of times.
pub(crate) fn retry_io<T>(mut op: impl FnMut() -> io::Result<T>, label: &str) -> io::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                attempt += 1;
                if attempt >= LOG_IO_MAX_ATTEMPTS {
                    return Err(err);
                }
                warn!("event=wal_io_retry op={label} attempt={attempt} error={err}");
                thread::sleep(LOG_IO_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

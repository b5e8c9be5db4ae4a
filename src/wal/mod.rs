use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::ingest::Sample;

/// Errors from WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("wal is closed")]
    Closed,
}

/// Append-only durable log of telemetry samples.
///
/// Records are newline-terminated JSON objects, one per line, so the file is
/// inspectable during incident response and a crash mid-write at most
/// truncates the final record. Every append is fsync'd before returning.
/// All operations are serialized by the WAL's own mutex.
pub struct Wal {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Wal {
    /// Opens the WAL at `path`, creating the parent directory and the file
    /// if absent. An existing file from a previous process is preserved and
    /// appended to.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WalError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Appends a record and syncs it to disk before returning.
    pub fn append(&self, record: &Sample) -> Result<(), WalError> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(WalError::Closed)?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        file.write_all(&line)?;
        file.sync_all()?;

        Ok(())
    }

    /// Reads every parseable record in file order.
    ///
    /// Lines that fail to parse (the partial tail left by a crash) are
    /// skipped with a warning; one corrupt record never hides the rest.
    pub fn read_all(&self) -> Result<Vec<Sample>, WalError> {
        let _guard = self.file.lock();

        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in data.lines() {
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(error = %e, "skipping unparseable WAL record");
                }
            }
        }

        Ok(records)
    }

    /// Truncates the WAL to zero length. After success `read_all` is empty.
    pub fn clear(&self) -> Result<(), WalError> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(WalError::Closed)?;

        // The handle is in append mode, so later writes land at the new end.
        file.set_len(0)?;
        file.sync_all()?;

        Ok(())
    }

    /// Returns the current file size in bytes, or 0 if it cannot be read.
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Returns the number of parseable records.
    pub fn count(&self) -> Result<usize, WalError> {
        Ok(self.read_all()?.len())
    }

    /// Releases the file handle. Subsequent appends fail with `Closed`.
    pub fn close(&self) {
        self.file.lock().take();
    }

    /// Returns the WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

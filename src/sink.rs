use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, error};

use crate::error::{Error, Result, SinkOp};
use crate::parse::{LogConfig, UNLIMITED};

/// The failure a sink last reported; repeats of the same fault stay quiet
/// until an operation succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFault {
    pub op: SinkOp,
    pub kind: io::ErrorKind,
}

/// Append-only log file bounded by a byte budget, with a numbered backup ring
/// `path.1` (newest) .. `path.N` (oldest).
#[derive(Debug)]
pub struct RotatingSink {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    size: u64,
    file: Option<File>,
    last_error: Option<SinkFault>,
    closed: bool,
}

impl RotatingSink {
    /*
        @@@
        @open();
        . Opens (or creates) the primary file for appending.
        . An existing file keeps its content and its length counts toward the first rotation.
        . A max_bytes of 0 disables rotation entirely.
    */
    pub async fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> Result<Self> {
        let mut sink = Self {
            path: path.into(),
            max_bytes,
            backups,
            size: 0,
            file: None,
            last_error: None,
            closed: false,
        };
        if let Err(source) = sink.reopen().await {
            return Err(Error::BadPath {
                path: sink.path,
                source,
            });
        }
        Ok(sink)
    }

    /// Opens the sink described by `cfg`, creating its parent directory if needed.
    pub async fn from_config(cfg: &LogConfig) -> Result<Self> {
        if let Some(dir) = cfg.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|source| Error::BadPath {
                path: cfg.path.clone(),
                source,
            })?;
        }
        Self::open(cfg.path.clone(), cfg.max_bytes, cfg.backups).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn backups(&self) -> usize {
        self.backups
    }

    /// Bytes currently held by the primary file.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_error(&self) -> Option<SinkFault> {
        self.last_error
    }

    /// Name of backup slot `index` (1 is the newest).
    pub fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    /*
        @@@
        @write();
        . Appends buf, splitting it at the budget boundary and rotating as many times as needed,
          so the primary never holds more than max_bytes once the call returns.
        . A write that lands exactly on the budget does not rotate; the next non-empty one does.
        . Every complete write is followed by a sync. Failures are reported once and the rest of buf is dropped.
    */
    pub async fn write(&mut self, mut buf: &[u8]) {
        if buf.is_empty() || self.closed {
            return;
        }
        if self.file.is_none() {
            // a previous rotation failed half way
            if let Err(e) = self.reopen().await {
                self.report(SinkOp::Open, e);
                return;
            }
        }

        while self.max_bytes != UNLIMITED && self.size.saturating_add(buf.len() as u64) > self.max_bytes {
            let remain = self.max_bytes.saturating_sub(self.size).min(buf.len() as u64) as usize;
            let (head, tail) = buf.split_at(remain);
            if let Err(e) = self.append(head).await {
                self.report(SinkOp::Write, e);
                return;
            }
            if let Err(e) = self.rotate().await {
                self.report(SinkOp::Rotate, e);
                return;
            }
            buf = tail;
        }

        if let Err(e) = self.append(buf).await {
            self.report(SinkOp::Write, e);
            return;
        }
        if let Err(e) = self.sync().await {
            self.report(SinkOp::Sync, e);
            return;
        }
        self.clear_error();
    }

    /// Flushes and releases the primary. Later calls, and later writes, do nothing.
    pub async fn close(&mut self) {
        self.closed = true;
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                self.report(SinkOp::Flush, e);
            }
        }
    }

    /*
        @@@
        @report();
        . Logs a failure on the supervisor's error stream unless the same fault is already pending.
        . Any successful operation (clear_error) re-arms reporting.
    */
    pub fn report(&mut self, op: SinkOp, err: io::Error) {
        let fault = SinkFault {
            op,
            kind: err.kind(),
        };
        if self.last_error == Some(fault) {
            return;
        }
        self.last_error = Some(fault);
        let err = Error::SinkIo {
            path: self.path.clone(),
            op,
            source: err,
        };
        error!(path = %self.path.display(), "[mini-supervisor] {err}");
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    async fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or_else(not_open)?;
        file.write_all(buf).await?;
        self.size += buf.len() as u64;
        Ok(())
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.file.as_mut().ok_or_else(not_open)?.sync_all().await
    }

    /*
        @@@
        @rotate();
        . Closes the primary, drops the oldest backup, shifts path.i to path.i+1 from the top down,
          then moves the primary into path.1 and opens a fresh, empty primary.
        . With no backups the primary is simply deleted.
    */
    async fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }

        if self.backups == 0 {
            ignore_missing(fs::remove_file(&self.path).await)?;
        } else {
            ignore_missing(fs::remove_file(self.backup_path(self.backups)).await)?;
            for i in (1..self.backups).rev() {
                ignore_missing(fs::rename(self.backup_path(i), self.backup_path(i + 1)).await)?;
            }
            ignore_missing(fs::rename(&self.path, self.backup_path(1)).await)?;
        }

        self.reopen().await?;
        debug!(path = %self.path.display(), backups = self.backups, "rotated log file");
        Ok(())
    }

    async fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.size = file.metadata().await?.len();
        self.file = Some(file);
        Ok(())
    }
}

fn ignore_missing(res: io::Result<()>) -> io::Result<()> {
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "log file is not open")
}

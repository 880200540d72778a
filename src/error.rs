use std::{fmt, io, path::PathBuf};

/// Which sink operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOp {
    Open,
    Read,
    Write,
    Flush,
    Sync,
    Rotate,
}

impl fmt::Display for SinkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkOp::Open => "open",
            SinkOp::Read => "read pipe",
            SinkOp::Write => "write file",
            SinkOp::Flush => "flush file",
            SinkOp::Sync => "sync file",
            SinkOp::Rotate => "rotate file",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent configuration.
    #[error("bad configuration: {0}")]
    BadConfig(String),

    /// A size string that is not `<digits>[KB|MB|GB]`.
    #[error("invalid size {0:?}")]
    BadSize(String),

    /// A log file that could not be opened for append.
    #[error("cannot open log file {}: {source}", path.display())]
    BadPath { path: PathBuf, source: io::Error },

    /// The OS refused to start the child.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("{op} fail on {}: {source}", path.display())]
    SinkIo {
        path: PathBuf,
        op: SinkOp,
        source: io::Error,
    },

    #[error("alert delivery failed: {0}")]
    AlertDelivery(String),
}

pub type Result<T> = std::result::Result<T, Error>;

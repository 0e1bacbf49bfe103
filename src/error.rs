use std::io;
use std::path::PathBuf;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by formatting, persistence and configuration.
///
/// Only [`Error::UnknownLevel`] and [`Error::UnsupportedFormat`] reach the
/// producer synchronously. Persistence failures are routed to the writer's
/// error callback, except for `flush` which returns them to its caller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown log level: {0}")]
    UnknownLevel(String),

    #[error("unsupported log format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("failed to open log file {path}: {source}")]
    OpenFile { path: PathBuf, source: io::Error },

    #[error("failed to write log file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to sync log file {path}: {source}")]
    Sync { path: PathBuf, source: io::Error },

    #[error("failed to compress {path}: {source}")]
    Compress { path: PathBuf, source: io::Error },

    #[error("no log file is open")]
    NoOpenFile,

    #[error("writer loop is not running")]
    ChannelClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

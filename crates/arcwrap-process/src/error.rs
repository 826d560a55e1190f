use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("binary not found: {program}")]
    BinaryNotFound { program: String },

    #[error("failed to start {program}: {source}")]
    SpawnFailed { program: String, source: io::Error },

    #[error("{program} exceeded timeout of {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

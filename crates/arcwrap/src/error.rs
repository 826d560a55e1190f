//! Error types for arcwrap.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of an [`OperationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unavailable,
    Timeout,
    NonZeroExit,
    NamingUnresolvable,
    Cancelled,
    Io,
}

/// Terminal failure of one operation.
///
/// Cloneable so every clone of a handle observes the same value.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    #[error("archiving tool '{program}' is not available")]
    BinaryUnavailable { program: String },

    #[error("failed to start '{program}': {source}")]
    ProcessStartFailed {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("operation timed out after {timeout:?}")]
    OperationTimedOut { timeout: Duration },

    #[error("tool exited with code {}{}", display_code(.code), display_tail(.stderr_tail))]
    NonZeroExit {
        code: Option<i32>,
        stderr_tail: Vec<String>,
    },

    #[error("member names could not be made extractable: {detail}{}", display_tail(.stderr_tail))]
    NamingUnresolvable {
        code: Option<i32>,
        stderr_tail: Vec<String>,
        detail: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to place sanitized member at '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl OperationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BinaryUnavailable { .. } | Self::ProcessStartFailed { .. } => ErrorKind::Unavailable,
            Self::OperationTimedOut { .. } => ErrorKind::Timeout,
            Self::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Self::NamingUnresolvable { .. } => ErrorKind::NamingUnresolvable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Staging { .. } | Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Exit code reported by the tool, when it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } | Self::NamingUnresolvable { code, .. } => *code,
            _ => None,
        }
    }

    /// Last diagnostic lines the tool wrote to stderr.
    pub fn stderr_tail(&self) -> &[String] {
        match self {
            Self::NonZeroExit { stderr_tail, .. } | Self::NamingUnresolvable { stderr_tail, .. } => stderr_tail,
            _ => &[],
        }
    }

    pub(crate) fn staging(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

impl From<arcwrap_process::Error> for OperationError {
    fn from(e: arcwrap_process::Error) -> Self {
        use arcwrap_process::Error as E;
        match e {
            E::BinaryNotFound { program } => Self::BinaryUnavailable { program },
            E::SpawnFailed { program, source } => Self::ProcessStartFailed {
                program,
                source: Arc::new(source),
            },
            E::TimedOut { timeout, .. } => Self::OperationTimedOut { timeout },
            E::Cancelled { .. } => Self::Cancelled,
            E::Io(source) => Self::Io(Arc::new(source)),
        }
    }
}

impl From<io::Error> for OperationError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_owned(), |c| c.to_string())
}

fn display_tail(tail: &[String]) -> String {
    match tail.iter().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => format!(": {}", line.trim()),
        None => String::new(),
    }
}

/// Configuration loading and process-wide defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("max_concurrent must be at least 1")]
    NoWorkers,

    #[error("process-wide defaults are already initialized")]
    AlreadyInitialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_errors_map_onto_kinds() {
        let unavailable: OperationError = arcwrap_process::Error::BinaryNotFound {
            program: "7zz".into(),
        }
        .into();
        assert_eq!(unavailable.kind(), ErrorKind::Unavailable);

        let timeout: OperationError = arcwrap_process::Error::TimedOut {
            program: "7zz".into(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert!(matches!(timeout, OperationError::OperationTimedOut { timeout } if timeout == Duration::from_secs(1)));

        let cancelled: OperationError = arcwrap_process::Error::Cancelled { program: "7zz".into() }.into();
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn non_zero_exit_message_carries_tail() {
        let err = OperationError::NonZeroExit {
            code: Some(2),
            stderr_tail: vec!["ERROR: Data Error : a.txt".into(), String::new()],
        };
        assert_eq!(err.to_string(), "tool exited with code 2: ERROR: Data Error : a.txt");
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.stderr_tail().len(), 2);
    }
}

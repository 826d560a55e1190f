//! Concurrent, cancellable archive operations over an external archiving tool.
//!
//! # Architecture
//!
//! - [`Coordinator`] - FIFO worker pool bounding concurrent tool processes
//! - [`OperationHandle`] - State, progress subscription, cancellation and result of one operation
//! - [`CoordinatorConfig`] - Pool settings, loadable from TOML; [`defaults`] holds a process-wide copy
//! - Output interpretation and name sanitization live in `arcwrap-archive`, process
//!   plumbing in `arcwrap-process`; both are re-exported here
//!
//! # Key Features
//!
//! - **Bounded**: at most `max_concurrent` tool processes, started in submission order
//! - **Cancellable**: queued operations never start, running ones have their process killed
//! - **Self-healing extraction**: an extraction that fails on member names is retried once
//!   with sanitized names, and the renames are reported

mod config;
mod coordinator;
pub mod defaults;
mod error;
mod handle;
mod naming;
mod operation;
mod staging;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{ConfigError, ErrorKind, OperationError};
pub use handle::{OperationHandle, OperationOutput, OperationResult, OperationState};
pub use naming::{NAMING_PHRASES, is_naming_failure};
pub use operation::{Operation, OperationKind, OperationRequest, ProgressCallback};

pub use arcwrap_archive::{
    ArchiveProperties, ArchiveSummary, Listing, MemberKind, MemberRecord, ProgressEvent, SanitizationDecision,
    SanitizationReason,
};
pub use arcwrap_process::{Launcher, ProcessLauncher};

//! Subprocess seam for the external archiving tool.
//!
//! # Architecture
//!
//! - `command.rs` - Invocation builder, binary check, async spawn and blocking capture
//! - `invocation.rs` - Running process handle: wait, cancel, timeout
//! - `lines.rs` - Line framing and concurrent pipe draining
//! - `launcher.rs` - [`Launcher`] trait seam
//! - `mock.rs` - Scripted launcher (feature `mock`)
//!
//! Both output pipes are always drained by background readers, so a caller
//! may consume stdout, stderr, both, or neither without risking a deadlock.

pub use command::{Captured, Command};
pub use error::{Error, Result};
pub use invocation::{ExitCode, Invocation};
pub use launcher::{Launcher, ProcessLauncher};
pub use lines::{LineSplitter, LineStream, OutputTail};

#[cfg(feature = "mock")]
pub use mock::{Script, ScriptedLauncher};

pub use tokio_util::sync::CancellationToken;

mod command;
mod error;
mod invocation;
mod launcher;
mod lines;
#[cfg(feature = "mock")]
mod mock;

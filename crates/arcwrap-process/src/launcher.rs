use std::sync::Arc;

use crate::command::Command;
use crate::error::Result;
use crate::invocation::Invocation;

/// Seam between orchestration code and the operating system.
///
/// # Implementations
///
/// - [`ProcessLauncher`]: spawns a real child process
/// - `ScriptedLauncher` (feature `mock`): replays canned output for tests
pub trait Launcher: Send + Sync + 'static {
    /// Start one invocation. Exactly one process is spawned per successful call.
    ///
    /// # Errors
    ///
    /// `BinaryNotFound` before anything is spawned, `SpawnFailed` when the OS
    /// refuses to start the process.
    fn launch(&self, command: &Command) -> Result<Invocation>;
}

/// Production launcher backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, command: &Command) -> Result<Invocation> {
        command.spawn()
    }
}

impl<T: Launcher> Launcher for Arc<T> {
    fn launch(&self, command: &Command) -> Result<Invocation> {
        (**self).launch(command)
    }
}

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::lines::{LineStream, OutputTail};

/// Exit status of the external tool.
///
/// `code` is `None` when the process was terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode {
    code: Option<i32>,
}

impl ExitCode {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn signaled() -> Self {
        Self { code: None }
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self { code: status.code() }
    }
}

pub(crate) enum Backend {
    Child(Child),
    #[cfg(feature = "mock")]
    Scripted(crate::mock::ScriptedExit),
}

impl Backend {
    async fn wait(&mut self) -> io::Result<ExitCode> {
        match self {
            Backend::Child(child) => child.wait().await.map(ExitCode::from),
            #[cfg(feature = "mock")]
            Backend::Scripted(exit) => Ok(exit.wait().await),
        }
    }

    /// Kill the process and wait until it is gone.
    async fn terminate(&mut self) -> io::Result<()> {
        match self {
            Backend::Child(child) => match child.kill().await {
                Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
                other => other,
            },
            #[cfg(feature = "mock")]
            Backend::Scripted(exit) => {
                exit.kill();
                Ok(())
            }
        }
    }
}

/// One running invocation of the external tool.
///
/// Output lines are available through [`take_stdout`](Self::take_stdout) and
/// [`take_stderr`](Self::take_stderr) while the process runs. The process is
/// killed if the invocation is dropped before it exits.
pub struct Invocation {
    program: String,
    backend: Backend,
    stdout: Option<LineStream>,
    stderr: Option<LineStream>,
    stderr_tail: OutputTail,
    readers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
    exit: Option<ExitCode>,
}

pub(crate) struct InvocationParts {
    pub program: String,
    pub backend: Backend,
    pub stdout: LineStream,
    pub stderr: LineStream,
    pub stderr_tail: OutputTail,
    pub readers: Vec<JoinHandle<()>>,
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub(crate) fn from_parts(parts: InvocationParts) -> Self {
        let started = Instant::now();
        Self {
            program: parts.program,
            backend: parts.backend,
            stdout: Some(parts.stdout),
            stderr: Some(parts.stderr),
            stderr_tail: parts.stderr_tail,
            readers: parts.readers,
            cancel: parts.cancel,
            deadline: parts.timeout.map(|timeout| (started + timeout, timeout)),
            exit: None,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the stdout line stream. Returns `None` once taken.
    pub fn take_stdout(&mut self) -> Option<LineStream> {
        self.stdout.take()
    }

    /// Take the stderr line stream. Returns `None` once taken.
    pub fn take_stderr(&mut self) -> Option<LineStream> {
        self.stderr.take()
    }

    /// The most recent stderr lines, whether or not the stream was consumed.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lines()
    }

    /// Token that terminates this invocation when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request termination. [`wait`](Self::wait) observes the request, kills
    /// the process and returns [`Error::Cancelled`] once it has exited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the process to exit, honouring cancellation and the timeout.
    pub async fn wait(&mut self) -> Result<ExitCode> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }

        let cancel = self.cancel.clone();
        let deadline = self.deadline;

        let outcome = tokio::select! {
            status = self.backend.wait() => status.map_err(Error::from),
            _ = cancel.cancelled() => {
                debug!(program = %self.program, "cancelling tool process");
                self.backend.terminate().await?;
                Err(Error::Cancelled { program: self.program.clone() })
            }
            _ = expired(deadline) => {
                let timeout = deadline.map(|(_, timeout)| timeout).unwrap_or_default();
                debug!(program = %self.program, ?timeout, "tool process timed out");
                self.backend.terminate().await?;
                Err(Error::TimedOut { program: self.program.clone(), timeout })
            }
        };

        // Pipes close once the process is gone; let the readers flush the
        // last lines into the streams and the stderr tail. Descendants may
        // keep the pipes open, so draining is bounded by the same deadline
        // and token, and readers still running afterwards are aborted.
        let mut readers = std::mem::take(&mut self.readers);
        if outcome.is_ok() {
            let drained = tokio::select! {
                _ = join_all(readers.iter_mut()) => true,
                _ = cancel.cancelled() => false,
                _ = expired(deadline) => false,
            };
            if !drained {
                debug!(program = %self.program, "output still open after exit, dropping readers");
            }
        }
        for reader in readers {
            reader.abort();
        }

        let exit = outcome?;
        self.exit = Some(exit);
        Ok(exit)
    }
}

async fn expired(deadline: Option<(Instant, Duration)>) {
    match deadline {
        Some((at, _)) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("deadline", &self.deadline)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

//! Scripted launcher that replays canned tool output.
//!
//! Used by downstream crates to exercise orchestration logic without the
//! real archiving tool. Every launch records its argument vector.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::invocation::{Backend, ExitCode, Invocation, InvocationParts};
use crate::launcher::Launcher;
use crate::lines::{LineStream, OutputTail, deliver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Unavailable,
    SpawnFailed,
}

/// Canned behaviour for one launch.
#[derive(Debug, Clone)]
pub struct Script {
    stdout: Vec<String>,
    stderr: Vec<String>,
    exit_code: i32,
    line_delay: Duration,
    exit_delay: Duration,
    failure: Option<Failure>,
}

impl Script {
    pub fn success() -> Self {
        Self::exit(0)
    }

    pub fn exit(code: i32) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: code,
            line_delay: Duration::ZERO,
            exit_delay: Duration::ZERO,
            failure: None,
        }
    }

    /// Launch fails with `BinaryNotFound`.
    pub fn unavailable() -> Self {
        Self {
            failure: Some(Failure::Unavailable),
            ..Self::success()
        }
    }

    /// Launch fails with `SpawnFailed`.
    pub fn spawn_failure() -> Self {
        Self {
            failure: Some(Failure::SpawnFailed),
            ..Self::success()
        }
    }

    pub fn stdout<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdout.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn stderr<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stderr.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Pause before each stdout line.
    pub fn line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// Extra time the "process" keeps running after its last line.
    pub fn exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }
}

struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct ScriptedExit {
    code: ExitCode,
    done_at: Instant,
    feeder: Option<JoinHandle<()>>,
    guard: Option<ActiveGuard>,
}

impl ScriptedExit {
    pub(crate) async fn wait(&mut self) -> ExitCode {
        tokio::time::sleep_until(self.done_at).await;
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.await;
        }
        self.guard.take();
        self.code
    }

    pub(crate) fn kill(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        self.guard.take();
        self.code = ExitCode::signaled();
    }
}

/// [`Launcher`] that pops one [`Script`] per launch, falling back to a
/// default script once the queue is empty.
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    calls: Mutex<Vec<Vec<String>>>,
    active: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::with_fallback(Script::success())
    }

    pub fn with_fallback(fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    /// Queue a script for the next launch.
    pub fn push(&self, script: Script) -> &Self {
        self.scripts.lock().push_back(script);
        self
    }

    /// Argument vectors of every launch so far, in launch order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Scripted processes currently "running".
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running scripted processes.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, command: &Command) -> Result<Invocation> {
        self.calls.lock().push(command.get_args().to_vec());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let program = command.program().to_owned();
        match script.failure {
            Some(Failure::Unavailable) => return Err(Error::BinaryNotFound { program }),
            Some(Failure::SpawnFailed) => {
                return Err(Error::SpawnFailed {
                    program,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "scripted spawn failure"),
                });
            }
            None => {}
        }

        let guard = ActiveGuard::enter(&self.active, &self.peak);
        let tail = OutputTail::new(command.get_tail_lines());
        let (out_tx, stdout) = LineStream::pair();
        let (err_tx, stderr) = LineStream::pair();
        for line in script.stderr {
            deliver(&err_tx, Some(&tail), line);
        }
        drop(err_tx);

        let line_delay = script.line_delay;
        let output_time = line_delay.saturating_mul(u32::try_from(script.stdout.len()).unwrap_or(u32::MAX));
        let lines = script.stdout;
        let feeder = tokio::spawn(async move {
            for line in lines {
                if !line_delay.is_zero() {
                    tokio::time::sleep(line_delay).await;
                }
                deliver(&out_tx, None, line);
            }
        });

        let exit = ScriptedExit {
            code: ExitCode::from_code(script.exit_code),
            done_at: Instant::now() + output_time + script.exit_delay,
            feeder: Some(feeder),
            guard: Some(guard),
        };

        Ok(Invocation::from_parts(InvocationParts {
            program,
            backend: Backend::Scripted(exit),
            stdout,
            stderr,
            stderr_tail: tail,
            readers: Vec::new(),
            cancel: command.cancellation_token(),
            timeout: command.get_timeout(),
        }))
    }
}

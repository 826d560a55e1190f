use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::invocation::{Backend, ExitCode, Invocation, InvocationParts};
use crate::lines::{self, LineStream, OutputTail};

const DEFAULT_TAIL_LINES: usize = 20;
const BLOCKING_POLL: Duration = Duration::from_millis(10);

/// Output of a blocking run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub exit: ExitCode,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Invocation request for the external tool.
///
/// The program string is used verbatim: a value containing a path separator
/// must name an existing file, a bare name must resolve on `PATH`.
#[derive(Debug, Clone)]
pub struct Command {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    cancel: Option<CancellationToken>,
    tail_lines: usize,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            current_dir: None,
            envs: Vec::new(),
            cancel: None,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.envs.push((key.into(), val.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Bytes written to the tool's standard input, which is then closed.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Kill the process if it is still running `timeout` after spawning.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Terminate the process when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Number of trailing stderr lines retained for diagnostics.
    pub fn stderr_tail(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn get_tail_lines(&self) -> usize {
        self.tail_lines
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default()
    }

    /// Check that the program can be executed, without spawning it.
    pub fn resolve(&self) -> Result<PathBuf> {
        let candidate = Path::new(&self.program);
        if candidate.is_absolute() || candidate.components().count() > 1 {
            return if candidate.is_file() {
                Ok(candidate.to_path_buf())
            } else {
                Err(Error::BinaryNotFound {
                    program: self.program.clone(),
                })
            };
        }
        which::which(&self.program).map_err(|_| Error::BinaryNotFound {
            program: self.program.clone(),
        })
    }

    fn configure<C>(&self, cmd: &mut C)
    where
        C: CommandLike,
    {
        cmd.set_args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.set_current_dir(dir);
        }
        for (key, val) in &self.envs {
            cmd.set_env(key, val);
        }
        cmd.set_stdio(self.stdin.is_some());
    }

    /// Spawn the tool with both output streams drained concurrently.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self) -> Result<Invocation> {
        let program = self.resolve()?;
        let mut cmd = tokio::process::Command::new(&program);
        self.configure(&mut cmd);
        cmd.kill_on_drop(true);

        debug!(program = %self.program, args = ?self.args, "spawning tool");
        let mut child = cmd.spawn().map_err(|source| Error::SpawnFailed {
            program: self.program.clone(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (self.stdin.clone(), child.stdin.take()) {
            let program = self.program.clone();
            tokio::spawn(async move {
                if let Err(err) = pipe.write_all(&input).await {
                    debug!(%program, %err, "tool closed stdin early");
                }
            });
        }

        let tail = OutputTail::new(self.tail_lines);
        let mut readers = Vec::with_capacity(2);

        let stdout = match child.stdout.take() {
            Some(pipe) => {
                let (tx, stream) = LineStream::pair();
                readers.push(lines::spawn_reader(pipe, tx, None));
                stream
            }
            None => LineStream::closed(),
        };
        let stderr = match child.stderr.take() {
            Some(pipe) => {
                let (tx, stream) = LineStream::pair();
                readers.push(lines::spawn_reader(pipe, tx, Some(tail.clone())));
                stream
            }
            None => LineStream::closed(),
        };

        Ok(Invocation::from_parts(InvocationParts {
            program: self.program.clone(),
            backend: Backend::Child(child),
            stdout,
            stderr,
            stderr_tail: tail,
            readers,
            cancel: self.cancellation_token(),
            timeout: self.timeout,
        }))
    }

    /// Run the tool to completion on the calling thread.
    ///
    /// Both pipes are drained on scoped threads so the tool never blocks on a
    /// full buffer. Honours the timeout and the cancellation token.
    pub fn capture_blocking(&self) -> Result<Captured> {
        let program = self.resolve()?;
        let mut cmd = std::process::Command::new(&program);
        self.configure(&mut cmd);

        debug!(program = %self.program, args = ?self.args, "running tool");
        let mut child = cmd.spawn().map_err(|source| Error::SpawnFailed {
            program: self.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cancel = self.cancellation_token();
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        std::thread::scope(|scope| {
            if let (Some(mut pipe), Some(input)) = (stdin, self.stdin.as_deref()) {
                scope.spawn(move || {
                    if let Err(err) = pipe.write_all(input) {
                        debug!(%err, "tool closed stdin early");
                    }
                });
            }
            let out = scope.spawn(move || lines::read_all_lines(stdout, None));
            let err = scope.spawn(move || lines::read_all_lines(stderr, None));

            let status = self.supervise(&mut child, &cancel, deadline);

            let exit = status?;
            Ok(Captured {
                exit,
                stdout: out.join().unwrap_or_default(),
                stderr: err.join().unwrap_or_default(),
            })
        })
    }
}

impl Command {
    /// Poll `child` until it exits, is cancelled or runs out of time.
    fn supervise<C: BlockingChild>(
        &self,
        child: &mut C,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<ExitCode> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(ExitCode::from(status)),
                Ok(None) => {}
                Err(err) => {
                    if let Err(kill_err) = kill_blocking(child) {
                        debug!(%kill_err, program = %self.program, "could not reap tool");
                    }
                    return Err(err.into());
                }
            }
            if cancel.is_cancelled() {
                kill_blocking(child)?;
                return Err(Error::Cancelled {
                    program: self.program.clone(),
                });
            }
            if deadline.is_some_and(|at| Instant::now() >= at) {
                kill_blocking(child)?;
                return Err(Error::TimedOut {
                    program: self.program.clone(),
                    timeout: self.timeout.unwrap_or_default(),
                });
            }
            std::thread::sleep(BLOCKING_POLL);
        }
    }
}

/// The calls [`Command::supervise`] makes on a running process.
trait BlockingChild {
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>>;
    fn kill(&mut self) -> std::io::Result<()>;
    fn wait(&mut self) -> std::io::Result<ExitStatus>;
}

impl BlockingChild for std::process::Child {
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        std::process::Child::try_wait(self)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        std::process::Child::kill(self)
    }

    fn wait(&mut self) -> std::io::Result<ExitStatus> {
        std::process::Child::wait(self)
    }
}

fn kill_blocking<C: BlockingChild>(child: &mut C) -> Result<()> {
    match child.kill() {
        Err(err) if err.kind() != std::io::ErrorKind::InvalidInput => return Err(err.into()),
        _ => {}
    }
    child.wait()?;
    Ok(())
}

/// The subset of builder calls shared by the std and tokio command types.
trait CommandLike {
    fn set_args(&mut self, args: &[String]);
    fn set_current_dir(&mut self, dir: &Path);
    fn set_env(&mut self, key: &OsString, val: &OsString);
    fn set_stdio(&mut self, with_stdin: bool);
}

impl CommandLike for std::process::Command {
    fn set_args(&mut self, args: &[String]) {
        self.args(args);
    }

    fn set_current_dir(&mut self, dir: &Path) {
        self.current_dir(dir);
    }

    fn set_env(&mut self, key: &OsString, val: &OsString) {
        self.env(key, val);
    }

    fn set_stdio(&mut self, with_stdin: bool) {
        self.stdout(Stdio::piped()).stderr(Stdio::piped());
        self.stdin(if with_stdin { Stdio::piped() } else { Stdio::null() });
    }
}

impl CommandLike for tokio::process::Command {
    fn set_args(&mut self, args: &[String]) {
        self.args(args);
    }

    fn set_current_dir(&mut self, dir: &Path) {
        self.current_dir(dir);
    }

    fn set_env(&mut self, key: &OsString, val: &OsString) {
        self.env(key, val);
    }

    fn set_stdio(&mut self, with_stdin: bool) {
        self.stdout(Stdio::piped()).stderr(Stdio::piped());
        self.stdin(if with_stdin { Stdio::piped() } else { Stdio::null() });
    }
}

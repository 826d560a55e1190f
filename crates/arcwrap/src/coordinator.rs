use std::collections::BTreeMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use arcwrap_archive::{Listing, ListingParser, ProgressParser, SanitizationDecision, build_mapping};
use arcwrap_process::{Command, Launcher, ProcessLauncher};
use futures_util::FutureExt;
use futures_util::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::CoordinatorConfig;
use crate::defaults;
use crate::error::OperationError;
use crate::handle::{OperationHandle, OperationOutput, OperationResult, OperationState};
use crate::naming::is_naming_failure;
use crate::operation::{Operation, OperationRequest, extract_args, list_args};
use crate::staging::Staging;

struct Job {
    handle: OperationHandle,
    operation: Operation,
    timeout: Option<Duration>,
}

struct Inner<L> {
    launcher: L,
    config: CoordinatorConfig,
    slots: Arc<Semaphore>,
    next_id: AtomicU64,
    running: AtomicUsize,
}

/// Per-operation execution context.
struct Run<'a> {
    handle: &'a OperationHandle,
    /// Absolute deadline and the budget it was computed from.
    deadline: Option<(Instant, Duration)>,
}

/// How one tool invocation ended.
struct Exit {
    code: Option<i32>,
    stderr_tail: Vec<String>,
}

impl Exit {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn into_error(self) -> OperationError {
        OperationError::NonZeroExit {
            code: self.code,
            stderr_tail: self.stderr_tail,
        }
    }

    fn unresolvable(self, detail: impl Into<String>) -> OperationError {
        OperationError::NamingUnresolvable {
            code: self.code,
            stderr_tail: self.stderr_tail,
            detail: detail.into(),
        }
    }
}

/// Runs archive operations on a bounded pool of tool processes.
///
/// Operations start in submission order, at most `max_concurrent` at a time.
/// Each submission returns an [`OperationHandle`] for observing state,
/// progress and the result, and for cancellation.
///
/// Construction spawns a dispatcher task and must happen inside a tokio
/// runtime. Clones share the same pool.
///
/// # Examples
///
/// ```no_run
/// use arcwrap::{Coordinator, CoordinatorConfig, Operation, OperationRequest};
///
/// # async fn run() -> Result<(), arcwrap::OperationError> {
/// let coordinator = Coordinator::new(CoordinatorConfig::default().max_concurrent(2));
/// let handle = coordinator.submit(
///     OperationRequest::new(Operation::extract("photos.7z", "out"))
///         .on_progress(|event| println!("{:.0}%", event.percentage)),
/// );
/// let output = handle.wait().await?;
/// for rename in output.renames() {
///     println!("{} -> {}", rename.original_name, rename.final_name);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Coordinator<L: Launcher = ProcessLauncher> {
    inner: Arc<Inner<L>>,
    queue: mpsc::UnboundedSender<Job>,
}

impl<L: Launcher> Clone for Coordinator<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            queue: self.queue.clone(),
        }
    }
}

impl<L: Launcher> std::fmt::Debug for Coordinator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.inner.config)
            .field("running", &self.running())
            .finish()
    }
}

impl Coordinator<ProcessLauncher> {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_launcher(ProcessLauncher, config)
    }

    /// Coordinator over the process-wide defaults.
    pub fn from_defaults() -> Self {
        Self::new(defaults::get())
    }
}

impl<L: Launcher> Coordinator<L> {
    /// A `max_concurrent` of zero is treated as one.
    pub fn with_launcher(launcher: L, config: CoordinatorConfig) -> Self {
        let inner = Arc::new(Inner {
            launcher,
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            next_id: AtomicU64::new(1),
            running: AtomicUsize::new(0),
        });
        let (queue, jobs) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(Arc::clone(&inner), jobs));
        Self { inner, queue }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn launcher(&self) -> &L {
        &self.inner.launcher
    }

    /// Operations currently holding a worker slot.
    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Queue an operation. Never blocks.
    pub fn submit(&self, request: impl Into<OperationRequest>) -> OperationHandle {
        let request = request.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = OperationHandle::new(id, request.operation.kind());
        if let Some(callback) = request.on_progress {
            handle.add_callback(callback);
        }

        debug!(id, kind = %handle.kind(), "operation queued");
        let job = Job {
            handle: handle.clone(),
            operation: request.operation,
            timeout: request.timeout.or(self.inner.config.timeout),
        };
        if self.queue.send(job).is_err() {
            handle.finish(Err(OperationError::Cancelled));
        }
        handle
    }

    /// Queue several operations; handles are returned in input order.
    pub fn submit_batch<I, R>(&self, requests: I) -> Vec<OperationHandle>
    where
        I: IntoIterator<Item = R>,
        R: Into<OperationRequest>,
    {
        requests.into_iter().map(|request| self.submit(request)).collect()
    }

    /// Submit a batch and wait for every result, in input order.
    pub async fn run_batch<I, R>(&self, requests: I) -> Vec<OperationResult>
    where
        I: IntoIterator<Item = R>,
        R: Into<OperationRequest>,
    {
        let handles = self.submit_batch(requests);
        join_all(handles.iter().map(|handle| handle.wait())).await
    }

    pub async fn list(&self, archive: impl Into<PathBuf>) -> Result<Listing, OperationError> {
        let output = self.submit(Operation::list(archive)).wait().await?;
        Ok(output.into_listing().unwrap_or_default())
    }

    /// Extract into `destination`. Returns the renames applied, empty when
    /// every member kept its name.
    pub async fn extract(
        &self,
        archive: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Result<Vec<SanitizationDecision>, OperationError> {
        let output = self.submit(Operation::extract(archive, destination)).wait().await?;
        Ok(output.renames().to_vec())
    }

    pub async fn create<P>(&self, archive: impl Into<PathBuf>, sources: impl IntoIterator<Item = P>) -> Result<(), OperationError>
    where
        P: Into<PathBuf>,
    {
        self.submit(Operation::create(archive, sources)).wait().await.map(|_| ())
    }

    pub async fn test(&self, archive: impl Into<PathBuf>) -> Result<(), OperationError> {
        self.submit(Operation::test(archive)).wait().await.map(|_| ())
    }
}

/// Starts queued jobs in FIFO order as slots free up.
async fn dispatch<L: Launcher>(inner: Arc<Inner<L>>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        if job.handle.state() != OperationState::Queued {
            continue;
        }
        let token = job.handle.cancellation_token();
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => continue,
            permit = Arc::clone(&inner.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if !job.handle.try_start() {
            continue;
        }
        tokio::spawn(Arc::clone(&inner).run(job, permit));
    }
}

impl<L: Launcher> Inner<L> {
    async fn run(self: Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        self.running.fetch_add(1, Ordering::SeqCst);
        let span = info_span!("operation", id = job.handle.id(), kind = %job.handle.kind());
        let run = Run {
            handle: &job.handle,
            deadline: job.timeout.map(|timeout| (Instant::now() + timeout, timeout)),
        };

        let result = AssertUnwindSafe(self.execute(&run, &job.operation).instrument(span.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(io::Error::other("operation task panicked").into()));

        self.running.fetch_sub(1, Ordering::SeqCst);
        span.in_scope(|| match &result {
            Ok(_) => debug!("operation succeeded"),
            Err(OperationError::Cancelled) => info!("operation cancelled"),
            Err(err) => warn!(%err, "operation failed"),
        });
        job.handle.finish(result);
        drop(permit);
    }

    async fn execute(&self, run: &Run<'_>, operation: &Operation) -> OperationResult {
        let overwrite = self.config.overwrite;
        match operation {
            Operation::List { archive } => self.list_members(run, archive).await.map(OperationOutput::Listing),
            Operation::Extract { archive, destination } => {
                let mut progress = ProgressParser::new();
                let exit = self
                    .invoke(run, extract_args(archive, destination, overwrite), |line| {
                        report(run.handle, &mut progress, &line);
                    })
                    .await?;
                if exit.success() {
                    return Ok(OperationOutput::Completed);
                }
                if self.config.naming_retry && is_naming_failure(&exit.stderr_tail) {
                    info!(code = ?exit.code, "extraction failed on member names, retrying with sanitized names");
                    return self
                        .extract_sanitized(run, archive, destination, exit, &mut progress)
                        .await;
                }
                Err(exit.into_error())
            }
            Operation::Create { .. } | Operation::Test { .. } | Operation::Raw { .. } => {
                let mut progress = ProgressParser::new();
                let exit = self
                    .invoke(run, operation.to_args(overwrite), |line| {
                        report(run.handle, &mut progress, &line);
                    })
                    .await?;
                if exit.success() {
                    Ok(OperationOutput::Completed)
                } else {
                    Err(exit.into_error())
                }
            }
        }
    }

    async fn list_members(&self, run: &Run<'_>, archive: &Path) -> Result<Listing, OperationError> {
        let mut parser = ListingParser::new();
        let exit = self
            .invoke(run, list_args(archive), |line| parser.push_line(&line))
            .await?;
        if !exit.success() {
            return Err(exit.into_error());
        }
        let listing = parser.finish();
        debug!(members = listing.len(), "parsed listing");
        Ok(listing)
    }

    /// Single retry of a failed extraction: extract into a staging directory
    /// and move each member to its sanitized name.
    async fn extract_sanitized(
        &self,
        run: &Run<'_>,
        archive: &Path,
        destination: &Path,
        first: Exit,
        progress: &mut ProgressParser,
    ) -> OperationResult {
        let listing = match self.list_members(run, archive).await {
            Ok(listing) => listing,
            Err(err @ (OperationError::Cancelled | OperationError::OperationTimedOut { .. })) => return Err(err),
            Err(err) => return Err(first.unresolvable(format!("could not list members for renaming: {err}"))),
        };

        let decisions = build_mapping(listing.members.iter().map(|member| member.path.as_str()));
        if decisions.is_empty() {
            return Err(first.unresolvable("no member name needs sanitization"));
        }
        for decision in &decisions {
            warn!(
                original = %decision.original_name,
                sanitized = %decision.final_name,
                reasons = ?decision.reasons,
                "renaming archive member"
            );
        }

        let staging = Staging::create(destination)?;
        let args = extract_args(archive, staging.path(), true);
        let exit = self
            .invoke(run, args, |line| report(run.handle, progress, &line))
            .await?;
        if !exit.success() {
            return Err(if is_naming_failure(&exit.stderr_tail) {
                exit.unresolvable("extraction still fails on member names after renaming")
            } else {
                exit.into_error()
            });
        }

        let mapping: BTreeMap<String, String> = decisions
            .iter()
            .map(|d| (d.original_name.replace('\\', "/"), d.final_name.clone()))
            .collect();
        let overwrite = self.config.overwrite;
        let moved = tokio::task::spawn_blocking(move || staging.commit(&mapping, overwrite))
            .await
            .map_err(|e| OperationError::from(io::Error::other(e)))??;
        info!(moved, renamed = decisions.len(), "extracted with sanitized names");
        Ok(OperationOutput::ExtractedWithRenames(decisions))
    }

    /// Run the tool once, feeding each stdout line to `on_line` as it
    /// arrives.
    async fn invoke<F>(&self, run: &Run<'_>, args: Vec<String>, mut on_line: F) -> Result<Exit, OperationError>
    where
        F: FnMut(String) + Send,
    {
        let token = run.handle.cancellation_token();
        if token.is_cancelled() {
            return Err(OperationError::Cancelled);
        }
        let remaining = match run.deadline {
            Some((at, budget)) => {
                let left = at.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(OperationError::OperationTimedOut { timeout: budget });
                }
                Some(left)
            }
            None => None,
        };

        let command = Command::new(&self.config.binary)
            .args(args)
            .timeout(remaining)
            .cancel_on(token)
            .stderr_tail(self.config.stderr_tail_lines);
        debug!(args = ?command.get_args(), "invoking tool");
        let mut invocation = self.launcher.launch(&command)?;

        let stdout = invocation.take_stdout();
        let drain = async move {
            if let Some(mut lines) = stdout {
                while let Some(line) = lines.next_line().await {
                    on_line(line);
                }
            }
        };
        let ((), status) = tokio::join!(drain, invocation.wait());

        let exit = status.map_err(|err| match (err, run.deadline) {
            (arcwrap_process::Error::TimedOut { .. }, Some((_, budget))) => {
                OperationError::OperationTimedOut { timeout: budget }
            }
            (err, _) => err.into(),
        })?;
        Ok(Exit {
            code: exit.code(),
            stderr_tail: invocation.stderr_tail(),
        })
    }
}

fn report(handle: &OperationHandle, progress: &mut ProgressParser, line: &str) {
    if let Some(event) = progress.feed(line) {
        handle.emit(&event);
    }
}

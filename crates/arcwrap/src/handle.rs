use std::fmt;
use std::sync::Arc;

use arcwrap_archive::{Listing, ProgressEvent, SanitizationDecision};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::OperationError;
use crate::operation::{OperationKind, ProgressCallback};

/// Lifecycle of a submitted operation.
///
/// Transitions: `Queued -> Running -> {Succeeded, Failed, Cancelled}` and
/// `Queued -> Cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Successful outcome of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    /// Parsed `l -slt` output.
    Listing(Listing),
    Completed,
    /// Extraction that only succeeded after renaming members.
    ExtractedWithRenames(Vec<SanitizationDecision>),
}

impl OperationOutput {
    pub fn into_listing(self) -> Option<Listing> {
        match self {
            Self::Listing(listing) => Some(listing),
            _ => None,
        }
    }

    /// Renames applied during extraction; empty when none were needed.
    pub fn renames(&self) -> &[SanitizationDecision] {
        match self {
            Self::ExtractedWithRenames(decisions) => decisions,
            _ => &[],
        }
    }
}

pub type OperationResult = Result<OperationOutput, OperationError>;

struct Shared {
    id: u64,
    kind: OperationKind,
    state: watch::Sender<OperationState>,
    // Held across every state transition.
    result: Mutex<Option<OperationResult>>,
    cancel: CancellationToken,
    callbacks: Mutex<Vec<ProgressCallback>>,
}

/// Observer of one submitted operation.
///
/// Clones refer to the same operation and observe the same state, result
/// and progress.
#[derive(Clone)]
pub struct OperationHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl OperationHandle {
    pub(crate) fn new(id: u64, kind: OperationKind) -> Self {
        let (state, _) = watch::channel(OperationState::Queued);
        Self {
            shared: Arc::new(Shared {
                id,
                kind,
                state,
                result: Mutex::new(None),
                cancel: CancellationToken::new(),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Submission-order identifier, unique within one coordinator.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn kind(&self) -> OperationKind {
        self.shared.kind
    }

    pub fn state(&self) -> OperationState {
        *self.shared.state.borrow()
    }

    /// Request cancellation.
    ///
    /// A queued operation becomes `Cancelled` immediately and never starts.
    /// A running one has its tool process terminated and becomes `Cancelled`
    /// once the process is gone. No effect on a finished operation.
    pub fn cancel(&self) {
        let mut result = self.shared.result.lock();
        match self.state() {
            OperationState::Queued => {
                *result = Some(Err(OperationError::Cancelled));
                self.shared.state.send_replace(OperationState::Cancelled);
                self.shared.cancel.cancel();
            }
            OperationState::Running => self.shared.cancel.cancel(),
            _ => {}
        }
    }

    /// Register a progress observer. Only events emitted after registration
    /// are delivered.
    pub fn subscribe_progress<F>(&self, callback: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.add_callback(Arc::new(callback));
    }

    /// Wait until the operation reaches a terminal state.
    pub async fn wait(&self) -> OperationResult {
        let mut states = self.shared.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = states.wait_for(OperationState::is_terminal).await;
        self.try_result().unwrap_or(Err(OperationError::Cancelled))
    }

    /// The result, if the operation has finished.
    pub fn try_result(&self) -> Option<OperationResult> {
        self.shared.result.lock().clone()
    }

    pub(crate) fn add_callback(&self, callback: ProgressCallback) {
        self.shared.callbacks.lock().push(callback);
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// `Queued -> Running`. Returns false when the operation was cancelled
    /// while it waited for a slot.
    pub(crate) fn try_start(&self) -> bool {
        let _guard = self.shared.result.lock();
        if self.state() != OperationState::Queued {
            return false;
        }
        self.shared.state.send_replace(OperationState::Running);
        true
    }

    /// Record the final result. Ignored once terminal.
    pub(crate) fn finish(&self, outcome: OperationResult) {
        let mut result = self.shared.result.lock();
        if self.state().is_terminal() {
            return;
        }
        let state = match &outcome {
            Ok(_) => OperationState::Succeeded,
            Err(OperationError::Cancelled) => OperationState::Cancelled,
            Err(_) => OperationState::Failed,
        };
        *result = Some(outcome);
        self.shared.state.send_replace(state);
    }

    pub(crate) fn emit(&self, event: &ProgressEvent) {
        // Callbacks may subscribe further observers.
        let callbacks = self.shared.callbacks.lock().clone();
        for callback in callbacks {
            callback(event);
        }
    }
}

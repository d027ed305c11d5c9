//! State of one example invocation.

use std::{cell::RefCell, fmt, rc::Rc, time::Duration};

use tidepool_core::{ConnectionHandle, ConnectionLifecycle, ExampleError, Options};

use crate::{
    group::Metadata,
    hooks::{Entered, HookRegistry},
    locals::ExampleLocals,
    reactor::{Reactor, TimerId},
    sync::OperationTable,
};

/// What an example runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExampleMode {
    /// Reactor only.
    #[default]
    Plain,
    /// Reactor plus a connection set up before the body and torn down by
    /// `done`.
    ConnectionBacked,
}

impl fmt::Display for ExampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExampleMode::Plain => f.write_str("plain"),
            ExampleMode::ConnectionBacked => f.write_str("connection-backed"),
        }
    }
}

/// Lifecycle phase of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Created, reactor not started.
    Idle,
    /// Reactor running, body not suspended.
    LoopRunning,
    /// Body waiting inside `sync`.
    Suspended,
    /// `done` accepted; teardown in progress.
    Completing,
    /// Reactor stopped and after hooks run.
    Finished,
}

/// Mutable part of an execution.
#[derive(Debug)]
pub(crate) struct ExecutionInner {
    pub(crate) state: ExecutionState,
    /// First failure of the example. Never overwritten.
    pub(crate) captured_error: Option<ExampleError>,
    pub(crate) deadline: Option<Duration>,
    pub(crate) timeout_timer: Option<TimerId>,
    /// Operation of the outstanding `sync`, if any.
    pub(crate) suspended: Option<String>,
    pub(crate) connection: Option<ConnectionHandle>,
    pub(crate) plain_entered: Entered,
    pub(crate) loop_entered: Entered,
    pub(crate) connection_entered: Entered,
    pub(crate) connection_after_ran: bool,
    pub(crate) loop_after_ran: bool,
}

impl ExecutionInner {
    fn new() -> Self {
        Self {
            state: ExecutionState::Idle,
            captured_error: None,
            deadline: None,
            timeout_timer: None,
            suspended: None,
            connection: None,
            plain_entered: Entered::No,
            loop_entered: Entered::No,
            connection_entered: Entered::No,
            connection_after_ran: false,
            loop_after_ran: false,
        }
    }

    /// Record `error` unless one is already captured. Returns whether it was
    /// recorded.
    pub(crate) fn capture(&mut self, error: ExampleError) -> bool {
        match &self.captured_error {
            None => {
                tracing::debug!(%error, "example error captured");
                self.captured_error = Some(error);
                true
            }
            Some(first) => {
                tracing::warn!(%error, %first, "example already failed, later error dropped");
                false
            }
        }
    }

    /// Whether `done` has been accepted.
    pub(crate) fn is_completing(&self) -> bool {
        matches!(
            self.state,
            ExecutionState::Completing | ExecutionState::Finished
        )
    }
}

/// Everything one example invocation owns.
pub(crate) struct Execution {
    pub(crate) mode: ExampleMode,
    pub(crate) reactor: Reactor,
    pub(crate) hooks: HookRegistry,
    pub(crate) lifecycle: Option<Rc<dyn ConnectionLifecycle>>,
    pub(crate) operations: OperationTable,
    /// Options as given to the run, `spec_timeout` removed.
    pub(crate) options: Options,
    pub(crate) metadata: RefCell<Metadata>,
    pub(crate) locals: RefCell<ExampleLocals>,
    pub(crate) inner: RefCell<ExecutionInner>,
}

impl Execution {
    pub(crate) fn new(
        mode: ExampleMode,
        reactor: Reactor,
        hooks: HookRegistry,
        lifecycle: Option<Rc<dyn ConnectionLifecycle>>,
        operations: OperationTable,
        options: Options,
        metadata: Metadata,
    ) -> Self {
        Self {
            mode,
            reactor,
            hooks,
            lifecycle,
            operations,
            options,
            metadata: RefCell::new(metadata),
            locals: RefCell::new(ExampleLocals::default()),
            inner: RefCell::new(ExecutionInner::new()),
        }
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("mode", &self.mode)
            .field("options", &self.options)
            .field("hooks", &self.hooks)
            .field("operations", &self.operations)
            .field("locals", &self.locals.borrow())
            .field("inner", &self.inner.borrow())
            .finish()
    }
}

//! The handle bodies and hooks drive an example through.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    time::Duration,
};

use tidepool_core::{
    ArgumentError, ConnectionHandle, ConnectionLifecycle, ExampleError, ExampleResult, Options,
};

use super::execution::{ExampleMode, Execution, ExecutionState};
use crate::{
    group::Metadata,
    hooks::HookKind,
    reactor::Reactor,
    sync::{self, Completion, Operation, SyncCall, SyncReceiver},
};

pub(crate) type DoneBlock = Box<dyn FnOnce()>;

/// Handle on the running example.
///
/// Cheap to clone. Everything is single-threaded: the context is `!Send`
/// and must only be used from the reactor's thread.
#[derive(Clone)]
pub struct ExampleContext {
    pub(crate) execution: Rc<Execution>,
}

impl fmt::Debug for ExampleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExampleContext")
            .field("execution", &self.execution)
            .finish()
    }
}

impl ExampleContext {
    pub(crate) fn new(execution: Execution) -> Self {
        Self {
            execution: Rc::new(execution),
        }
    }

    /// Finish the example.
    ///
    /// Only the first `done` to take effect counts; later calls are
    /// ignored.
    pub fn done(&self) {
        self.schedule_done(None, Box::new(|| {}));
    }

    /// Finish the example, running `block` inside the loop first.
    pub fn done_with<F: FnOnce() + 'static>(&self, block: F) {
        self.schedule_done(None, Box::new(block));
    }

    /// Finish the example after `delay`.
    ///
    /// The deadline keeps running meanwhile and may fire first.
    pub fn done_in(&self, delay: Duration) {
        self.schedule_done(Some(delay), Box::new(|| {}));
    }

    /// Finish the example after `delay`, running `block` first.
    pub fn done_in_with<F: FnOnce() + 'static>(&self, delay: Duration, block: F) {
        self.schedule_done(Some(delay), Box::new(block));
    }

    /// Fail the example with `error` and finish it.
    ///
    /// Ignored for the error slot if the example already failed.
    pub fn fail(&self, error: impl Into<ExampleError>) {
        self.capture(error.into());
        self.done();
    }

    /// Replace the example's deadline with `duration` from now.
    pub fn timeout(&self, duration: Duration) -> ExampleResult<()> {
        super::timeout::set_timeout(self, duration)
    }

    /// Issue a callback-style operation and wait for its completion.
    ///
    /// See [`crate::sync`] for how operations are resolved.
    pub async fn sync<R>(&self, call: SyncCall<R>) -> ExampleResult<R> {
        sync::bridge(self, call).await
    }

    /// Typed shorthand for [`ExampleContext::sync`]: `operation` receives a
    /// [`Completion<T>`], `callback` the value it completes with.
    pub async fn sync_fn<T, R, Op, Cb>(&self, operation: Op, callback: Cb) -> ExampleResult<R>
    where
        Op: FnOnce(Completion<T>) -> ExampleResult<()>,
        Cb: FnOnce(T) -> ExampleResult<R>,
    {
        let value = sync::suspend(self, "sync_fn", operation).await?;
        callback(value)
    }

    /// Reactor running this example.
    pub fn reactor(&self) -> Reactor {
        self.execution.reactor.clone()
    }

    /// Whether the reactor pass is in progress.
    pub fn is_reactor_running(&self) -> bool {
        self.execution.reactor.is_running()
    }

    /// Mode the example runs in.
    pub fn mode(&self) -> ExampleMode {
        self.execution.mode
    }

    /// Options the example was run with, `spec_timeout` removed.
    pub fn options(&self) -> &Options {
        &self.execution.options
    }

    /// Deadline most recently set.
    pub fn deadline(&self) -> Option<Duration> {
        self.execution.inner.borrow().deadline
    }

    /// Current phase.
    pub fn execution_state(&self) -> ExecutionState {
        self.execution.inner.borrow().state
    }

    /// Error captured so far.
    pub fn captured_error(&self) -> Option<ExampleError> {
        self.execution.inner.borrow().captured_error.clone()
    }

    /// Connection of a connection-backed example once established.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.execution.inner.borrow().connection.clone()
    }

    /// Whether the example's connection exists and is usable.
    pub fn is_connected(&self) -> bool {
        match (self.connection(), &self.execution.lifecycle) {
            (Some(connection), Some(lifecycle)) => lifecycle.is_connected(&connection),
            (Some(connection), None) => connection.is_connected(),
            _ => false,
        }
    }

    /// Copy of this example's metadata.
    pub fn metadata(&self) -> Metadata {
        self.execution.metadata.borrow().clone()
    }

    /// Edit this example's metadata. Edits never reach the group.
    pub fn with_metadata<R>(&self, f: impl FnOnce(&mut Metadata) -> R) -> R {
        f(&mut self.execution.metadata.borrow_mut())
    }

    /// Store `value` as this example's `T`, returning the previous one.
    ///
    /// Locals are visible to every hook and to the body of this example
    /// only, and are dropped once its after hooks have run.
    pub fn set_local<T: 'static>(&self, value: T) -> Option<T> {
        self.execution.locals.borrow_mut().insert(value)
    }

    /// Copy of this example's `T`.
    pub fn local<T: Clone + 'static>(&self) -> Option<T> {
        self.execution.locals.borrow().get::<T>().cloned()
    }

    /// Remove and return this example's `T`.
    pub fn take_local<T: 'static>(&self) -> Option<T> {
        self.execution.locals.borrow_mut().remove::<T>()
    }

    /// Edit this example's `T` in place, starting from `T::default()`.
    ///
    /// The value is taken out while `f` runs, so `f` may use the context
    /// freely; it sees no `T` of its own.
    pub fn with_local<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Default + 'static,
    {
        let mut value = self.take_local::<T>().unwrap_or_default();
        let result = f(&mut value);
        self.set_local(value);
        result
    }

    pub(crate) fn capture(&self, error: ExampleError) -> bool {
        self.execution.inner.borrow_mut().capture(error)
    }

    pub(crate) fn enter_suspension(&self, operation: &str) -> Result<(), ArgumentError> {
        let mut inner = self.execution.inner.borrow_mut();
        if let Some(outstanding) = &inner.suspended {
            return Err(ArgumentError::SyncOutstanding {
                outstanding: outstanding.clone(),
            });
        }
        inner.suspended = Some(operation.to_string());
        if inner.state == ExecutionState::LoopRunning {
            inner.state = ExecutionState::Suspended;
        }
        Ok(())
    }

    pub(crate) fn leave_suspension(&self) {
        let mut inner = self.execution.inner.borrow_mut();
        inner.suspended = None;
        if inner.state == ExecutionState::Suspended {
            inner.state = ExecutionState::LoopRunning;
        }
    }

    /// Run `block` then begin teardown, now or after `delay`.
    pub(crate) fn schedule_done(&self, delay: Option<Duration>, block: DoneBlock) {
        if self.execution.inner.borrow().is_completing() {
            tracing::debug!("done ignored, example already completing");
            return;
        }
        if !self.execution.reactor.is_running() {
            tracing::debug!("done ignored outside the reactor pass");
            return;
        }
        match delay {
            None => self.complete(block),
            Some(delay) => {
                let ctx = self.clone();
                if let Err(error) = self
                    .execution
                    .reactor
                    .add_timer(delay, move || ctx.complete(block))
                {
                    tracing::debug!(%error, "delayed done ignored, reactor not running");
                }
            }
        }
    }

    /// Accept `done`: run its block, then tear down on the next tick.
    pub(crate) fn complete(&self, block: DoneBlock) {
        {
            let mut inner = self.execution.inner.borrow_mut();
            if inner.is_completing() {
                tracing::debug!("done ignored, example already completing");
                return;
            }
            inner.state = ExecutionState::Completing;
        }
        tracing::debug!("done accepted");

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(block)) {
            self.capture(ExampleError::from_panic(payload));
        }

        let ctx = self.clone();
        if let Err(error) = self.execution.reactor.next_tick(move || ctx.begin_teardown()) {
            tracing::debug!(%error, "reactor gone before teardown");
        }
    }

    /// In-loop teardown: connection after hooks, close the connection, then
    /// finish the loop.
    pub(crate) fn begin_teardown(&self) {
        self.run_connection_after_hooks();

        let Some((lifecycle, connection)) = self.connection_to_stop() else {
            self.finish_loop();
            return;
        };

        tracing::debug!(connection = connection.id(), "stopping connection");
        let ctx = self.clone();
        let stop = async move {
            if let Err(error) = lifecycle.stop_connection(&connection).await {
                ctx.capture(error.into());
            }
            ctx.finish_loop();
        };
        if let Err(error) = self.execution.reactor.spawn(stop) {
            tracing::debug!(%error, "could not wait for connection close");
            self.finish_loop();
        }
    }

    /// Connection to close during teardown: present, still up and not
    /// already closing.
    fn connection_to_stop(
        &self,
    ) -> Option<(Rc<dyn ConnectionLifecycle>, ConnectionHandle)> {
        if self.execution.mode != ExampleMode::ConnectionBacked {
            return None;
        }
        let lifecycle = self.execution.lifecycle.clone()?;
        let connection = self.connection()?;
        if connection.is_closing() {
            tracing::debug!(connection = connection.id(), "connection already closing");
            return None;
        }
        Some((lifecycle, connection))
    }

    /// Connection after hooks, once, if the connection was established.
    pub(crate) fn run_connection_after_hooks(&self) {
        let entered = {
            let mut inner = self.execution.inner.borrow_mut();
            if inner.connection_after_ran {
                return;
            }
            inner.connection_after_ran = true;
            inner.connection_entered
        };
        self.execution
            .hooks
            .run_after(HookKind::ConnectionAfter, entered, self, |error| {
                self.capture(error);
            });
    }

    /// Loop after hooks, once.
    pub(crate) fn run_loop_after_hooks(&self) {
        let entered = {
            let mut inner = self.execution.inner.borrow_mut();
            if inner.loop_after_ran {
                return;
            }
            inner.loop_after_ran = true;
            inner.loop_entered
        };
        self.execution
            .hooks
            .run_after(HookKind::LoopAfter, entered, self, |error| {
                self.capture(error);
            });
    }

    /// Last in-loop step: loop after hooks, drop the deadline, stop the
    /// reactor.
    pub(crate) fn finish_loop(&self) {
        self.run_loop_after_hooks();
        super::timeout::cancel_timeout(self);
        self.execution.reactor.stop();
    }

    pub(crate) fn receiver_name(&self) -> String {
        "example".to_string()
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<Operation> {
        match name {
            "done" => Some(sync::done_operation()),
            _ => self.execution.operations.get(name),
        }
    }
}

impl SyncReceiver for ExampleContext {
    fn receiver_name(&self) -> String {
        ExampleContext::receiver_name(self)
    }

    fn resolve(&self, name: &str) -> Option<Operation> {
        ExampleContext::resolve(self, name)
    }
}

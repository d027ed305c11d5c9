//! Drives one example through one reactor pass.
//!
//! ```text
//! before hooks            (outside the loop)
//! └─ reactor pass
//!    ├─ em_before hooks
//!    ├─ deadline armed
//!    ├─ start connection + amqp_before hooks   (connection-backed)
//!    ├─ body
//!    └─ done ─► block ─► next tick:
//!               amqp_after hooks ─► stop connection ─► em_after hooks ─► stop
//! leftover after hooks    (if the pass crashed)
//! cleanup_state           (connection-backed)
//! after hooks             (outside the loop)
//! ```

use std::{
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    time::Duration,
};

use futures::{future::LocalBoxFuture, FutureExt};
use tidepool_core::{
    ArgumentError, ConnectionLifecycle, ConnectionOptions, ExampleError, ExampleResult, Options,
};
use tracing::instrument;

use super::{
    context::ExampleContext,
    execution::{ExampleMode, Execution, ExecutionState},
    timeout,
};
use crate::{
    group::Metadata,
    hooks::{Entered, HookKind, HookRegistry},
    reactor::{ClockMode, Reactor},
    sync::OperationTable,
};

/// Future returned by an example body.
pub type BodyFuture = LocalBoxFuture<'static, ExampleResult<()>>;

/// Example body, called once inside the reactor pass.
pub type Body = Box<dyn FnOnce(ExampleContext) -> BodyFuture>;

/// Everything a group hands over to run one example.
pub(crate) struct ExamplePlan {
    pub(crate) name: String,
    pub(crate) mode: ExampleMode,
    pub(crate) clock: ClockMode,
    pub(crate) hooks: HookRegistry,
    pub(crate) lifecycle: Option<Rc<dyn ConnectionLifecycle>>,
    pub(crate) operations: OperationTable,
    /// Defaults merged with call-site options, `spec_timeout` included.
    pub(crate) options: Options,
    /// Deadline passed to the run entry point.
    pub(crate) timeout: Option<Duration>,
    /// Group-level fallback deadline.
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) metadata: Metadata,
}

/// Run one example and report its first failure.
///
/// Argument errors in the plan are returned before anything runs.
#[instrument(skip_all, fields(example = %plan.name, mode = %plan.mode))]
pub(crate) fn run_example(plan: ExamplePlan, body: Body) -> ExampleResult<()> {
    let ExamplePlan {
        name: _,
        mode,
        clock,
        hooks,
        lifecycle,
        operations,
        mut options,
        timeout,
        default_timeout,
        metadata,
    } = plan;

    let deadline = options.take_spec_timeout()?.or(timeout).or(default_timeout);
    let connection_options = match mode {
        ExampleMode::Plain => None,
        ExampleMode::ConnectionBacked => {
            if lifecycle.is_none() {
                return Err(ArgumentError::MissingConnectionLifecycle.into());
            }
            Some(ConnectionOptions::try_from(&options)?)
        }
    };

    let reactor = Reactor::new(clock);
    let ctx = ExampleContext::new(Execution::new(
        mode,
        reactor.clone(),
        hooks,
        lifecycle,
        operations,
        options,
        metadata,
    ));
    tracing::debug!(?deadline, "example started");

    let before = ctx.execution.hooks.run_before(HookKind::Before, &ctx);
    let entered_loop = match before {
        Ok(entered) => {
            ctx.execution.inner.borrow_mut().plain_entered = entered;
            true
        }
        Err(failure) => {
            ctx.execution.inner.borrow_mut().plain_entered = Entered::UpTo(failure.depth);
            ctx.capture(failure.error);
            false
        }
    };

    if entered_loop {
        let setup = ctx.clone();
        let pass = reactor.run(move |_| start_in_loop(setup, deadline, connection_options, body));
        if let Err(crash) = pass {
            tracing::debug!(%crash, "reactor pass ended abnormally");
            ctx.capture(crash);
        }
        // Teardown the pass did not reach still runs, outside the loop.
        ctx.run_connection_after_hooks();
        ctx.run_loop_after_hooks();
        timeout::cancel_timeout(&ctx);
    }

    finish_example(&ctx)
}

/// First callback of the pass.
fn start_in_loop(
    ctx: ExampleContext,
    deadline: Option<Duration>,
    connection_options: Option<ConnectionOptions>,
    body: Body,
) {
    ctx.execution.inner.borrow_mut().state = ExecutionState::LoopRunning;

    let before = ctx.execution.hooks.run_before(HookKind::LoopBefore, &ctx);
    let entered = match &before {
        Ok(entered) => *entered,
        Err(failure) => Entered::UpTo(failure.depth),
    };
    ctx.execution.inner.borrow_mut().loop_entered = entered;
    if let Err(failure) = before {
        ctx.fail(failure.error);
        return;
    }

    if let Some(deadline) = deadline {
        if let Err(error) = timeout::set_timeout(&ctx, deadline) {
            ctx.fail(error);
            return;
        }
    }

    let task_ctx = ctx.clone();
    let task = async move {
        if let Some(options) = connection_options {
            if !open_connection(&task_ctx, &options).await {
                return;
            }
        }
        if task_ctx.execution.inner.borrow().is_completing() {
            tracing::debug!("example finished before its body started");
            return;
        }
        run_body(task_ctx, body).await;
    };
    if let Err(error) = ctx.execution.reactor.spawn(task) {
        ctx.fail(error);
    }
}

/// Establish the connection and run the connection before hooks. Returns
/// whether the body should run.
async fn open_connection(ctx: &ExampleContext, options: &ConnectionOptions) -> bool {
    let Some(lifecycle) = ctx.execution.lifecycle.clone() else {
        ctx.fail(ArgumentError::MissingConnectionLifecycle);
        return false;
    };

    match lifecycle.start_connection(options).await {
        Ok(connection) => {
            tracing::debug!(connection = connection.id(), host = %options.host, "connection established");
            ctx.execution.inner.borrow_mut().connection = Some(connection);
        }
        Err(error) => {
            tracing::debug!(%error, host = %options.host, "connection failed");
            ctx.fail(error);
            return false;
        }
    }

    if ctx.execution.inner.borrow().is_completing() {
        return false;
    }

    let before = ctx.execution.hooks.run_before(HookKind::ConnectionBefore, ctx);
    let entered = match &before {
        Ok(entered) => *entered,
        Err(failure) => Entered::UpTo(failure.depth),
    };
    ctx.execution.inner.borrow_mut().connection_entered = entered;
    if let Err(failure) = before {
        ctx.fail(failure.error);
        return false;
    }
    let completing = ctx.execution.inner.borrow().is_completing();
    !completing
}

/// Run the body. A returned error or a panic fails the example.
async fn run_body(ctx: ExampleContext, body: Body) {
    let body_ctx = ctx.clone();
    let future = match panic::catch_unwind(AssertUnwindSafe(move || body(body_ctx))) {
        Ok(future) => future,
        Err(payload) => {
            ctx.fail(ExampleError::from_panic(payload));
            return;
        }
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => tracing::trace!("body returned"),
        Ok(Err(error)) => {
            tracing::debug!(%error, "body failed");
            ctx.fail(error);
        }
        Err(payload) => {
            let error = ExampleError::from_panic(payload);
            tracing::debug!(%error, "body panicked");
            ctx.fail(error);
        }
    }
}

/// Out-of-loop epilogue: cleanup, after hooks, report.
fn finish_example(ctx: &ExampleContext) -> ExampleResult<()> {
    let entered = {
        let mut inner = ctx.execution.inner.borrow_mut();
        inner.state = ExecutionState::Finished;
        inner.suspended = None;
        inner.connection = None;
        inner.plain_entered
    };

    if ctx.execution.mode == ExampleMode::ConnectionBacked {
        if let Some(lifecycle) = &ctx.execution.lifecycle {
            lifecycle.cleanup_state();
            tracing::debug!("connection state cleaned up");
        }
    }

    ctx.execution
        .hooks
        .run_after(HookKind::After, entered, ctx, |error| {
            ctx.capture(error);
        });
    // Locals may hold context clones.
    ctx.execution.locals.borrow_mut().clear();

    let captured = ctx.execution.inner.borrow_mut().captured_error.take();
    match captured {
        Some(error) => {
            tracing::debug!(%error, "example failed");
            Err(error)
        }
        None => {
            tracing::debug!("example passed");
            Ok(())
        }
    }
}

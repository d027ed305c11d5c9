//! Example deadlines.
//!
//! At most one deadline timer is pending per example. Setting a new one
//! cancels the previous, so whichever was set last is the one that can
//! fire.

use std::time::Duration;

use tidepool_core::{ExampleError, ExampleResult};

use super::context::ExampleContext;

/// Replace the deadline of `ctx` with `duration` from now.
pub(crate) fn set_timeout(ctx: &ExampleContext, duration: Duration) -> ExampleResult<()> {
    cancel_timeout(ctx);
    let fire = ctx.clone();
    let id = ctx
        .execution
        .reactor
        .add_timer(duration, move || on_timeout(&fire, duration))?;

    let mut inner = ctx.execution.inner.borrow_mut();
    inner.timeout_timer = Some(id);
    inner.deadline = Some(duration);
    tracing::debug!(?duration, %id, "example deadline set");
    Ok(())
}

/// Cancel the pending deadline, if any. A no-op once it fired.
pub(crate) fn cancel_timeout(ctx: &ExampleContext) {
    let pending = ctx.execution.inner.borrow_mut().timeout_timer.take();
    if let Some(id) = pending {
        ctx.execution.reactor.cancel_timer(id);
    }
}

fn on_timeout(ctx: &ExampleContext, duration: Duration) {
    let completing = {
        let mut inner = ctx.execution.inner.borrow_mut();
        inner.timeout_timer = None;
        inner.capture(ExampleError::TimeoutExceeded(duration));
        inner.is_completing()
    };

    if completing {
        // Teardown is stuck, typically on a close that never calls back.
        tracing::warn!(?duration, "deadline passed during teardown, forcing loop shutdown");
        ctx.run_connection_after_hooks();
        ctx.finish_loop();
    } else {
        tracing::debug!(?duration, "deadline passed");
        ctx.complete(Box::new(|| {}));
    }
}

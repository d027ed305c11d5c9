use std::{collections::BTreeMap, fmt, rc::Rc};

use serde_json::Value;
use tidepool_core::{seconds_from_value, ArgumentError, ExampleError, ExampleResult};
use tokio::sync::oneshot;

use super::{Completion, Operation, SyncArgs, SyncCall, SyncReceiver};
use crate::{example::ExampleContext, reactor::Reactor};

/// Named operations a group makes available to `sync`.
#[derive(Clone, Default)]
pub struct OperationTable {
    entries: BTreeMap<String, Operation>,
}

impl OperationTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `operation` under `name`, replacing any previous entry.
    pub fn define(&mut self, name: impl Into<String>, operation: Operation) {
        self.entries.insert(name.into(), operation);
    }

    /// Look up `name`.
    pub fn get(&self, name: &str) -> Option<Operation> {
        self.entries.get(name).cloned()
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// First argument as an optional delay in seconds.
fn delay_arg(operation: &str, args: &SyncArgs) -> Result<Option<std::time::Duration>, ArgumentError> {
    match args.first() {
        None | Some(Value::Null) => Ok(None),
        Some(value) => seconds_from_value(operation, value).map(Some),
    }
}

/// `done [delay]`: finish the example, firing the completion from the
/// done block.
pub(crate) fn done_operation() -> Operation {
    Rc::new(
        |ctx: &ExampleContext, args: SyncArgs, completion: Completion| -> ExampleResult<()> {
            let delay = delay_arg("done", &args)?;
            ctx.schedule_done(delay, Box::new(move || completion.complete_empty()));
            Ok(())
        },
    )
}

impl SyncReceiver for Reactor {
    fn receiver_name(&self) -> String {
        "reactor".to_string()
    }

    fn resolve(&self, name: &str) -> Option<Operation> {
        let reactor = self.clone();
        let operation: Operation = match name {
            "add_timer" => Rc::new(move |_: &ExampleContext, args: SyncArgs, completion: Completion| -> ExampleResult<()> {
                let delay = delay_arg("add_timer", &args)?.unwrap_or_default();
                reactor.add_timer(delay, move || completion.complete_empty())?;
                Ok(())
            }),
            "next_tick" => Rc::new(move |_: &ExampleContext, _: SyncArgs, completion: Completion| -> ExampleResult<()> {
                reactor.next_tick(move || completion.complete_empty())?;
                Ok(())
            }),
            _ => return None,
        };
        Some(operation)
    }
}

/// Marks an execution as suspended for as long as it lives.
pub(crate) struct SuspensionGuard {
    ctx: ExampleContext,
}

impl SuspensionGuard {
    pub(crate) fn new(ctx: &ExampleContext, operation: &str) -> Result<Self, ArgumentError> {
        ctx.enter_suspension(operation)?;
        Ok(Self { ctx: ctx.clone() })
    }
}

impl Drop for SuspensionGuard {
    fn drop(&mut self) {
        self.ctx.leave_suspension();
    }
}

/// Invoke `invoke` with a fresh completion and wait for it to fire.
pub(crate) async fn suspend<T, F>(ctx: &ExampleContext, operation: &str, invoke: F) -> ExampleResult<T>
where
    F: FnOnce(Completion<T>) -> ExampleResult<()>,
{
    let _guard = SuspensionGuard::new(ctx, operation)?;
    let (sender, receiver) = oneshot::channel();
    invoke(Completion::new(operation, sender))?;
    tracing::trace!(operation, "body suspended");
    receiver.await.map_err(|_| {
        tracing::debug!(operation, "completion dropped without being called");
        ExampleError::SyncAbandoned {
            operation: operation.to_string(),
        }
    })
}

/// Resolve and run `call`, returning the callback's result.
pub(crate) async fn bridge<R>(ctx: &ExampleContext, call: SyncCall<R>) -> ExampleResult<R> {
    let SyncCall {
        callable,
        args,
        callback,
    } = call;
    let callback = callback.ok_or(ArgumentError::MissingCallback)?;
    let label = callable.label();
    let operation = callable.resolve(ctx)?;
    let values = suspend(ctx, &label, |completion| operation(ctx, args, completion)).await?;
    callback(values)
}

//! Straight-line calls over callback-style operations.
//!
//! An operation takes its arguments plus a one-shot [`Completion`] and
//! returns immediately; whoever eventually holds the completion invokes it
//! with the result. [`ExampleContext::sync`] issues such an operation,
//! suspends the body until the completion fires and hands the values to a
//! callback whose result becomes the return value of the call:
//!
//! ```ignore
//! let fired = ctx
//!     .sync(SyncCall::on(ctx.reactor(), "add_timer").arg(0.2).then(|_| Ok(true)))
//!     .await?;
//! ```
//!
//! Operations are resolved from one of three places:
//!
//! - a closure given directly ([`SyncCall::callable`]),
//! - a name looked up on the example context ([`SyncCall::named`]): the
//!   built-in `done` plus operations defined on the group,
//! - a name looked up on another receiver ([`SyncCall::on`]), such as the
//!   reactor's `add_timer` and `next_tick`.
//!
//! Only one call may be suspended per example at a time.
//!
//! [`ExampleContext::sync`]: crate::ExampleContext::sync

mod dispatch;

use std::{fmt, rc::Rc};

use serde_json::Value;
use tidepool_core::{ArgumentError, ExampleResult};
use tokio::sync::oneshot;

use crate::example::ExampleContext;

pub(crate) use dispatch::{bridge, done_operation, suspend};
pub use dispatch::OperationTable;

/// Positional arguments of an operation.
pub type SyncArgs = Vec<Value>;

/// Values an operation completes with.
pub type SyncValues = Vec<Value>;

/// A callback-style operation.
pub type Operation = Rc<dyn Fn(&ExampleContext, SyncArgs, Completion) -> ExampleResult<()>>;

/// One-shot handle resuming a suspended `sync` call.
///
/// Dropping it without calling [`Completion::complete`] fails the call
/// with [`ExampleError::SyncAbandoned`](tidepool_core::ExampleError::SyncAbandoned).
pub struct Completion<T = SyncValues> {
    operation: String,
    sender: oneshot::Sender<T>,
}

impl<T> Completion<T> {
    pub(crate) fn new(operation: &str, sender: oneshot::Sender<T>) -> Self {
        Self {
            operation: operation.to_string(),
            sender,
        }
    }

    /// Operation this completion belongs to.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Resume the suspended call with `value`.
    pub fn complete(self, value: T) {
        if self.sender.send(value).is_err() {
            tracing::debug!(operation = %self.operation, "completion fired after its caller went away");
        }
    }
}

impl Completion<SyncValues> {
    /// Resume the suspended call with no values.
    pub fn complete_empty(self) {
        self.complete(Vec::new());
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("operation", &self.operation)
            .finish()
    }
}

/// Something operations can be looked up on by name.
pub trait SyncReceiver {
    /// Name used in error messages.
    fn receiver_name(&self) -> String;

    /// Look up `name`. `None` when the receiver has no such operation.
    fn resolve(&self, name: &str) -> Option<Operation>;
}

/// Where the operation of a [`SyncCall`] comes from.
#[derive(Clone)]
pub enum Callable {
    /// A directly supplied operation.
    Direct(Operation),
    /// A name resolved on the example context.
    Named(String),
    /// A name resolved on another receiver.
    On {
        /// Receiver to resolve on.
        receiver: Rc<dyn SyncReceiver>,
        /// Operation name.
        name: String,
    },
}

impl Callable {
    pub(crate) fn label(&self) -> String {
        match self {
            Callable::Direct(_) => "callable".to_string(),
            Callable::Named(name) => name.clone(),
            Callable::On { receiver, name } => format!("{}.{name}", receiver.receiver_name()),
        }
    }

    pub(crate) fn resolve(&self, ctx: &ExampleContext) -> Result<Operation, ArgumentError> {
        let (found, receiver, name) = match self {
            Callable::Direct(op) => return Ok(op.clone()),
            Callable::Named(name) => (ctx.resolve(name), ctx.receiver_name(), name),
            Callable::On { receiver, name } => (receiver.resolve(name), receiver.receiver_name(), name),
        };
        found.ok_or_else(|| ArgumentError::UnknownOperation {
            receiver,
            name: name.clone(),
        })
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

type SyncCallback<R> = Box<dyn FnOnce(SyncValues) -> ExampleResult<R>>;

/// A `sync` request: what to call, with which arguments, and what to do
/// with the result.
pub struct SyncCall<R = ()> {
    pub(crate) callable: Callable,
    pub(crate) args: SyncArgs,
    pub(crate) callback: Option<SyncCallback<R>>,
}

impl SyncCall {
    /// Call `operation` directly.
    pub fn callable<F>(operation: F) -> Self
    where
        F: Fn(&ExampleContext, SyncArgs, Completion) -> ExampleResult<()> + 'static,
    {
        Self::from_operation(Rc::new(operation))
    }

    /// Call an already resolved operation.
    pub fn from_operation(operation: Operation) -> Self {
        Self::new(Callable::Direct(operation))
    }

    /// Call the operation `name` of the example context.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Callable::Named(name.into()))
    }

    /// Call the operation `name` of `receiver`.
    pub fn on<T: SyncReceiver + 'static>(receiver: T, name: impl Into<String>) -> Self {
        Self::new(Callable::On {
            receiver: Rc::new(receiver),
            name: name.into(),
        })
    }

    fn new(callable: Callable) -> Self {
        Self {
            callable,
            args: Vec::new(),
            callback: None,
        }
    }
}

impl<R> SyncCall<R> {
    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append several positional arguments.
    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Set the callback receiving the completion values. Its result becomes
    /// the result of the `sync` call.
    pub fn then<R2, F>(self, callback: F) -> SyncCall<R2>
    where
        F: FnOnce(SyncValues) -> ExampleResult<R2> + 'static,
    {
        SyncCall {
            callable: self.callable,
            args: self.args,
            callback: Some(Box::new(callback)),
        }
    }
}

impl<R> fmt::Debug for SyncCall<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCall")
            .field("callable", &self.callable)
            .field("args", &self.args)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

//! # Tidepool Harness
//!
//! Run test bodies written as straight-line `async` code against code whose
//! real work happens inside a single-threaded, callback-style event loop.
//!
//! ## Guarantees
//!
//! - **One pass per example**: every example gets a private [`Reactor`]
//!   pass that is torn down exactly once, whether the example succeeds,
//!   fails or times out.
//! - **Stack-like hooks**: before hooks run outermost group first, after
//!   hooks innermost first, even when the body fails or the loop crashes.
//! - **First failure wins**: an example reports a single
//!   [`ExampleError`], the earliest one captured.
//! - **No leaks**: connection-backed examples always clean up the
//!   collaborator's process-wide state before returning.
//!
//! ## Core Components
//!
//! - [`reactor`]: the event loop, with wall and logical clocks
//! - [`ExampleGroup`]: scopes carrying hooks, defaults and metadata, and the
//!   run entry points
//! - [`ExampleContext`]: what bodies and hooks use to finish, time out and
//!   [`sync`] on callback-style operations
//! - [`connection`]: the in-process [`LoopbackBroker`] collaborator
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use tidepool_harness::{ExampleGroup, SyncCall};
//!
//! let group = ExampleGroup::new("timers");
//! group.run_plain(Some(Duration::from_secs(1)), |ctx| async move {
//!     let fired = ctx
//!         .sync(SyncCall::on(ctx.reactor(), "add_timer").arg(0.2).then(|_| Ok(true)))
//!         .await?;
//!     assert!(fired);
//!     ctx.done();
//!     Ok(())
//! })?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod connection;
mod example;
mod group;
pub mod hooks;
mod locals;
pub mod logging;
pub mod reactor;
pub mod sync;

pub use config::{ConfigError, HarnessConfig};
pub use connection::{current_connection, BrokerStats, LoopbackBroker};
pub use example::{Body, BodyFuture, ExampleContext, ExampleMode, ExecutionState};
pub use group::{ExampleGroup, Metadata};
pub use hooks::{HookFn, HookKind, HookRegistry, HookScope};
pub use reactor::{ClockMode, Deferrable, DeferredStatus, Reactor, TimerId, WeakReactor};
pub use sync::{Callable, Completion, Operation, OperationTable, SyncArgs, SyncCall, SyncReceiver, SyncValues};

pub use tidepool_core::{
    json, ArgumentError, Connection, ConnectionError, ConnectionHandle, ConnectionLifecycle,
    ConnectionOptions, ExampleError, ExampleResult, Options, ReactorError, Value,
};

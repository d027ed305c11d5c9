//! One example invocation: state, deadline, loop driver and the context
//! handed to bodies and hooks.

mod context;
mod execution;
mod runner;
mod timeout;

pub use context::ExampleContext;
pub use execution::{ExampleMode, ExecutionState};
pub use runner::{Body, BodyFuture};

pub(crate) use runner::{run_example, ExamplePlan};

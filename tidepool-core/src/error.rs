//! Error types shared by the harness and its collaborators.

use std::time::Duration;

use thiserror::Error;

/// Misuse of the harness API detected at the call site.
///
/// Argument errors are returned directly to the caller and never go
/// through an execution's captured-error slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    /// A `sync` call was issued without a callback.
    #[error("sync requires a callback")]
    MissingCallback,

    /// A named operation could not be resolved on its receiver.
    #[error("`{receiver}` has no operation named `{name}`")]
    UnknownOperation {
        /// Receiver the lookup was performed on.
        receiver: String,
        /// Requested operation name.
        name: String,
    },

    /// A second `sync` was issued while another one is still suspended.
    #[error("sync `{outstanding}` is still suspended; only one sync may be outstanding")]
    SyncOutstanding {
        /// Operation of the suspension that is still pending.
        outstanding: String,
    },

    /// A hook was registered with a scope qualifier other than `each`.
    #[error("{kind} hooks only support the `each` scope, got `{scope}`")]
    UnsupportedHookScope {
        /// Hook family being registered.
        kind: String,
        /// Rejected scope qualifier.
        scope: String,
    },

    /// An operation received an argument it cannot interpret.
    #[error("invalid argument for `{operation}`: {reason}")]
    InvalidArgument {
        /// Operation receiving the argument.
        operation: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A connection-backed run was requested on a group without a lifecycle.
    #[error("no connection lifecycle configured for connection-backed examples")]
    MissingConnectionLifecycle,
}

/// Failure reported by the external connection collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The remote host could not be reached.
    #[error("could not connect to {host}:{port}")]
    Unreachable {
        /// Host that was dialed.
        host: String,
        /// Port that was dialed.
        port: u16,
    },

    /// The credentials were rejected.
    #[error("access refused for user `{user}`")]
    AccessRefused {
        /// User that attempted to log in.
        user: String,
    },

    /// The requested virtual host does not exist.
    #[error("unknown vhost `{vhost}`")]
    UnknownVhost {
        /// Requested virtual host.
        vhost: String,
    },

    /// Establishing the connection took longer than the configured timeout.
    #[error("connection not established within {0:?}")]
    Timeout(Duration),

    /// The connection was already closed.
    #[error("connection closed")]
    Closed,

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Failure of the event loop itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactorError {
    /// The operation requires a running reactor.
    #[error("reactor is not running")]
    NotRunning,

    /// `run` was called while a pass is already in progress.
    #[error("reactor is already running")]
    AlreadyRunning,

    /// The underlying runtime could not be built.
    #[error("failed to build reactor runtime: {0}")]
    Runtime(String),

    /// The reactor has been dropped.
    #[error("reactor has been shut down")]
    Shutdown,
}

/// The single failure reported for an example.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExampleError {
    /// The example's deadline elapsed before `done` was reached.
    #[error("example timed out after {0:?}")]
    TimeoutExceeded(Duration),

    /// The body, a hook or a sync callback returned an error.
    #[error("{0}")]
    Body(String),

    /// The body, a hook or a reactor callback panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// The harness API was misused.
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// The connection collaborator failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The event loop failed.
    #[error(transparent)]
    Reactor(#[from] ReactorError),

    /// A bridged operation dropped its completion without invoking it.
    #[error("`{operation}` dropped its completion without calling it")]
    SyncAbandoned {
        /// Operation that abandoned the suspension.
        operation: String,
    },
}

impl ExampleError {
    /// Build a body error from any displayable message.
    pub fn body(message: impl std::fmt::Display) -> Self {
        ExampleError::Body(message.to_string())
    }

    /// Build an error from a panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ExampleError::Panicked(message)
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExampleError::TimeoutExceeded(_))
    }

    /// Whether this error came from the connection collaborator.
    pub fn is_connection(&self) -> bool {
        matches!(self, ExampleError::Connection(_))
    }
}

impl From<String> for ExampleError {
    fn from(message: String) -> Self {
        ExampleError::Body(message)
    }
}

impl From<&str> for ExampleError {
    fn from(message: &str) -> Self {
        ExampleError::Body(message.to_string())
    }
}

/// A type alias for `Result<T, ExampleError>`.
pub type ExampleResult<T> = Result<T, ExampleError>;

//! Connection lifecycle abstraction.
//!
//! The harness does not speak any wire protocol. Connection-backed
//! examples delegate establishing and tearing down their connection to a
//! [`ConnectionLifecycle`] implementation, and only rely on the contract
//! described here:
//!
//! - `start_connection` resolves once the connection is ready to use.
//! - `stop_connection` resolves only after the underlying channel is closed.
//! - `cleanup_state` clears any process-wide bookkeeping so nothing leaks
//!   into the next example. The harness calls it unconditionally at the end
//!   of every connection-backed example.

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::options::ConnectionOptions;

/// A live connection handed out by a [`ConnectionLifecycle`].
pub trait Connection: fmt::Debug {
    /// Identifier, unique per lifecycle.
    fn id(&self) -> u64;

    /// Whether the connection is open and usable.
    fn is_connected(&self) -> bool;

    /// Whether a close has been requested but not yet completed.
    fn is_closing(&self) -> bool;
}

/// Shared handle to a connection.
pub type ConnectionHandle = Rc<dyn Connection>;

/// External collaborator establishing and tearing down connections.
#[async_trait(?Send)]
pub trait ConnectionLifecycle: 'static {
    /// Establish a connection; resolves when it is ready.
    async fn start_connection(
        &self,
        options: &ConnectionOptions,
    ) -> Result<ConnectionHandle, ConnectionError>;

    /// Whether `connection` is currently usable.
    fn is_connected(&self, connection: &ConnectionHandle) -> bool {
        connection.is_connected()
    }

    /// Close `connection`; resolves once the channel is fully closed.
    async fn stop_connection(&self, connection: &ConnectionHandle) -> Result<(), ConnectionError>;

    /// Forget any process-wide connection state.
    fn cleanup_state(&self);
}

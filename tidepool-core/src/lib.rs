//! # tidepool-core
//!
//! Shared vocabulary for the tidepool evented example harness.
//!
//! - **Errors**: [`ExampleError`] is the single failure an example reports;
//!   [`ArgumentError`], [`ConnectionError`] and [`ReactorError`] describe
//!   the individual concerns that feed into it.
//! - **Options**: [`Options`] is the string → value mapping groups and
//!   examples merge, [`ConnectionOptions`] its typed view.
//! - **Connection lifecycle**: [`ConnectionLifecycle`] and [`Connection`]
//!   are the interface of the external collaborator connection-backed
//!   examples delegate to.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod connection;
mod error;
mod options;

pub use connection::{Connection, ConnectionHandle, ConnectionLifecycle};
pub use error::{ArgumentError, ConnectionError, ExampleError, ExampleResult, ReactorError};
pub use options::{seconds_from_value, ConnectionOptions, Options, OptionsError, SPEC_TIMEOUT};

/// Re-exported so option values can be built without a direct dependency.
pub use serde_json::{json, Value};

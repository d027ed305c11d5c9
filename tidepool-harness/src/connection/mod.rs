//! Connection collaborators shipped with the harness.
//!
//! The [`ConnectionLifecycle`](tidepool_core::ConnectionLifecycle) trait
//! lives in `tidepool-core`; this module provides implementations.

pub mod loopback;

pub use loopback::{current_connection, BrokerStats, LoopbackBroker, LoopbackConnection};

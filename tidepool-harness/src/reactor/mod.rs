//! Callback-style event loop.
//!
//! ## Submodules
//!
//! - `world` - [`Reactor`] and [`WeakReactor`]
//! - `timers` - timer ids and bookkeeping
//! - `clock` - wall vs logical time
//! - `deferrable` - one-shot callback outcomes

pub mod clock;
pub mod deferrable;
pub mod timers;
pub mod world;

pub use clock::ClockMode;
pub use deferrable::{Deferrable, DeferredStatus};
pub use timers::TimerId;
pub use world::{Reactor, WeakReactor};

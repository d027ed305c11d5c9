//! Setup and teardown hooks contributed by nested groups.
//!
//! Six families exist. `before`/`after` run outside the reactor, the
//! `em_*` pair runs inside the loop around the body, and the `amqp_*` pair
//! runs once the connection of a connection-backed example is up.
//!
//! Before-family hooks run outermost group first in definition order;
//! after-family hooks run in exactly the reverse order.

mod registry;

use std::{fmt, rc::Rc, str::FromStr};

use tidepool_core::{ArgumentError, ExampleResult};

use crate::example::ExampleContext;

pub use registry::HookRegistry;
pub(crate) use registry::{Entered, HookFailure};

/// Hook closure. Receives the context of the example it runs for.
pub type HookFn = Rc<dyn Fn(&ExampleContext) -> ExampleResult<()>>;

/// Hook family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Before the reactor starts.
    Before,
    /// After the reactor stopped.
    After,
    /// Inside the loop, before the body.
    LoopBefore,
    /// Inside the loop, after `done`.
    LoopAfter,
    /// Once the connection is established, before the body.
    ConnectionBefore,
    /// Before the connection is closed.
    ConnectionAfter,
}

impl HookKind {
    pub(crate) const ALL: [HookKind; 6] = [
        HookKind::Before,
        HookKind::After,
        HookKind::LoopBefore,
        HookKind::LoopAfter,
        HookKind::ConnectionBefore,
        HookKind::ConnectionAfter,
    ];

    /// Whether this family tears down (runs innermost group first).
    pub fn is_after(self) -> bool {
        matches!(
            self,
            HookKind::After | HookKind::LoopAfter | HookKind::ConnectionAfter
        )
    }

    /// Registration name of the family.
    pub fn label(self) -> &'static str {
        match self {
            HookKind::Before => "before",
            HookKind::After => "after",
            HookKind::LoopBefore => "em_before",
            HookKind::LoopAfter => "em_after",
            HookKind::ConnectionBefore => "amqp_before",
            HookKind::ConnectionAfter => "amqp_after",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            HookKind::Before => 0,
            HookKind::After => 1,
            HookKind::LoopBefore => 2,
            HookKind::LoopAfter => 3,
            HookKind::ConnectionBefore => 4,
            HookKind::ConnectionAfter => 5,
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Scope qualifier a hook is registered with.
///
/// Only [`HookScope::Each`] is supported; the others exist so callers can
/// name them and get a proper [`ArgumentError::UnsupportedHookScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookScope {
    /// Around every example.
    #[default]
    Each,
    /// Once around the whole group.
    All,
    /// Once around the whole run.
    Suite,
}

impl fmt::Display for HookScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookScope::Each => f.write_str("each"),
            HookScope::All => f.write_str("all"),
            HookScope::Suite => f.write_str("suite"),
        }
    }
}

impl FromStr for HookScope {
    type Err = ArgumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "each" | "example" => Ok(HookScope::Each),
            "all" | "context" => Ok(HookScope::All),
            "suite" => Ok(HookScope::Suite),
            other => Err(ArgumentError::InvalidArgument {
                operation: "hook scope".to_string(),
                reason: format!("unknown scope `{other}`"),
            }),
        }
    }
}

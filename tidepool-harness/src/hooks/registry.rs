use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use tidepool_core::{ArgumentError, ExampleError, ExampleResult};

use super::{HookFn, HookKind, HookScope};
use crate::example::ExampleContext;

#[derive(Clone)]
struct Hook {
    /// Nesting depth of the group that defined it.
    depth: usize,
    run: HookFn,
}

/// A before hook failed.
#[derive(Debug)]
pub(crate) struct HookFailure {
    pub(crate) depth: usize,
    pub(crate) error: ExampleError,
}

/// How far a before family got. Bounds which after hooks may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entered {
    /// The before family never started.
    No,
    /// Groups up to and including this depth were entered.
    UpTo(usize),
}

impl Entered {
    fn admits(self, depth: usize) -> bool {
        match self {
            Entered::No => false,
            Entered::UpTo(limit) => depth <= limit,
        }
    }
}

/// Hook sequences of one group.
///
/// Storage is always definition order; after-family sequences are
/// reversed when executed. A nested group starts from an independent copy
/// of its parent's sequences, so later additions on either side stay
/// invisible to the other.
#[derive(Clone, Default)]
pub struct HookRegistry {
    depth: usize,
    sets: [Vec<Hook>; 6],
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in HookKind::ALL {
            map.entry(&kind.label(), &self.sets[kind.index()].len());
        }
        map.finish()
    }
}

impl HookRegistry {
    /// Registry of a top-level group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy for a nested group.
    pub fn child(&self) -> Self {
        Self {
            depth: self.depth + 1,
            sets: self.sets.clone(),
        }
    }

    /// Nesting depth, `0` for a top-level group.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Register `hook` for `kind`.
    ///
    /// Fails with [`ArgumentError::UnsupportedHookScope`] for any scope but
    /// [`HookScope::Each`].
    pub fn define<F>(&mut self, kind: HookKind, scope: HookScope, hook: F) -> Result<(), ArgumentError>
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        if scope != HookScope::Each {
            return Err(ArgumentError::UnsupportedHookScope {
                kind: kind.label().to_string(),
                scope: scope.to_string(),
            });
        }
        self.sets[kind.index()].push(Hook {
            depth: self.depth,
            run: Rc::new(hook),
        });
        Ok(())
    }

    /// Number of hooks of `kind` visible to this group.
    pub fn len(&self, kind: HookKind) -> usize {
        self.sets[kind.index()].len()
    }

    /// Whether no hook of `kind` is visible to this group.
    pub fn is_empty(&self, kind: HookKind) -> bool {
        self.sets[kind.index()].is_empty()
    }

    /// Run the before family `kind` in order, stopping at the first failure.
    ///
    /// On success every group up to this one counts as entered.
    pub(crate) fn run_before(&self, kind: HookKind, ctx: &ExampleContext) -> Result<Entered, HookFailure> {
        debug_assert!(!kind.is_after());
        for hook in &self.sets[kind.index()] {
            if let Err(error) = invoke(hook, ctx) {
                tracing::debug!(%kind, depth = hook.depth, %error, "before hook failed");
                return Err(HookFailure {
                    depth: hook.depth,
                    error,
                });
            }
        }
        Ok(Entered::UpTo(self.depth))
    }

    /// Run the after family `kind` innermost first, limited to entered
    /// groups. Every failure is handed to `on_error`; none of them stops
    /// the remaining hooks.
    pub(crate) fn run_after(
        &self,
        kind: HookKind,
        entered: Entered,
        ctx: &ExampleContext,
        mut on_error: impl FnMut(ExampleError),
    ) {
        debug_assert!(kind.is_after());
        for hook in self.sets[kind.index()].iter().rev() {
            if !entered.admits(hook.depth) {
                continue;
            }
            if let Err(error) = invoke(hook, ctx) {
                tracing::debug!(%kind, depth = hook.depth, %error, "after hook failed");
                on_error(error);
            }
        }
    }
}

fn invoke(hook: &Hook, ctx: &ExampleContext) -> ExampleResult<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| (hook.run)(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(ExampleError::from_panic(payload)),
    }
}

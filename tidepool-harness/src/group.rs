//! Example groups: the scopes hooks, defaults and metadata hang off.
//!
//! A group is a handle; clones share the same scope. [`ExampleGroup::describe`]
//! creates a nested scope starting from a copy of everything its parent has
//! at that moment. Later changes on either side stay invisible to the
//! other, and every example gets its own copy of the metadata.

use std::{cell::RefCell, collections::BTreeMap, fmt, future::Future, rc::Rc, time::Duration};

use futures::FutureExt;
use serde_json::Value;
use tidepool_core::{ArgumentError, ConnectionLifecycle, ExampleResult, Options};
use tracing::instrument;

use crate::{
    config::HarnessConfig,
    example::{run_example, Body, ExampleContext, ExampleMode, ExamplePlan},
    hooks::{HookKind, HookRegistry, HookScope},
    reactor::ClockMode,
    sync::{Completion, OperationTable, SyncArgs},
};

/// Free-form per-scope metadata.
pub type Metadata = BTreeMap<String, Value>;

#[derive(Clone)]
struct GroupState {
    name: String,
    config: HarnessConfig,
    default_options: Options,
    metadata: Metadata,
    hooks: HookRegistry,
    operations: OperationTable,
    lifecycle: Option<Rc<dyn ConnectionLifecycle>>,
    mode: ExampleMode,
}

/// A scope examples are run from.
///
/// # Example
///
/// ```ignore
/// let group = ExampleGroup::new("broker");
/// group.em_before(|ctx| { ctx.set_local(Attempts(0)); Ok(()) });
///
/// let nested = group.describe("publishing");
/// nested.set_default_timeout(Duration::from_secs(1));
/// nested.run_plain(None, |ctx| async move {
///     ctx.done();
///     Ok(())
/// })?;
/// ```
#[derive(Clone)]
pub struct ExampleGroup {
    state: Rc<RefCell<GroupState>>,
}

impl fmt::Debug for ExampleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ExampleGroup")
            .field("name", &state.name)
            .field("mode", &state.mode)
            .field("config", &state.config)
            .field("default_options", &state.default_options)
            .field("hooks", &state.hooks)
            .field("operations", &state.operations)
            .field("has_lifecycle", &state.lifecycle.is_some())
            .finish()
    }
}

impl ExampleGroup {
    /// Top-level group with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, HarnessConfig::default())
    }

    /// Top-level group with `config`.
    pub fn with_config(name: impl Into<String>, config: HarnessConfig) -> Self {
        Self::from_state(GroupState {
            name: name.into(),
            config,
            default_options: Options::new(),
            metadata: Metadata::new(),
            hooks: HookRegistry::new(),
            operations: OperationTable::new(),
            lifecycle: None,
            mode: ExampleMode::Plain,
        })
    }

    fn from_state(state: GroupState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Nested scope starting from a copy of this one.
    pub fn describe(&self, name: impl AsRef<str>) -> ExampleGroup {
        let parent = self.state.borrow();
        let mut state = parent.clone();
        state.name = format!("{} {}", parent.name, name.as_ref());
        state.hooks = parent.hooks.child();
        tracing::trace!(group = %state.name, depth = state.hooks.depth(), "nested group defined");
        Self::from_state(state)
    }

    /// Full name, outer groups first.
    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    /// Harness configuration of this scope.
    pub fn config(&self) -> HarnessConfig {
        self.state.borrow().config.clone()
    }

    /// Clock used by examples of this scope.
    pub fn set_clock(&self, clock: ClockMode) {
        self.state.borrow_mut().config.clock = clock;
    }

    /// Register a hook of `kind` with an explicit scope qualifier.
    pub fn define_hook<F>(&self, kind: HookKind, scope: HookScope, hook: F) -> Result<(), ArgumentError>
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        self.state.borrow_mut().hooks.define(kind, scope, hook)
    }

    fn each<F>(&self, kind: HookKind, hook: F) -> &Self
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        if let Err(error) = self.define_hook(kind, HookScope::Each, hook) {
            tracing::error!(%error, "each-scoped hook rejected");
        }
        self
    }

    /// Hook run before the reactor starts.
    pub fn before<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        self.each(HookKind::Before, hook)
    }

    /// Hook run after the reactor stopped.
    pub fn after<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        self.each(HookKind::After, hook)
    }

    /// Hook run inside the loop before the body.
    pub fn em_before<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        self.each(HookKind::LoopBefore, hook)
    }

    /// Hook run inside the loop once the example is done.
    pub fn em_after<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        self.each(HookKind::LoopAfter, hook)
    }

    /// Hook run once the connection is up, before the body.
    pub fn amqp_before<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        self.each(HookKind::ConnectionBefore, hook)
    }

    /// Hook run before the connection is closed.
    pub fn amqp_after<F>(&self, hook: F) -> &Self
    where
        F: Fn(&ExampleContext) -> ExampleResult<()> + 'static,
    {
        self.each(HookKind::ConnectionAfter, hook)
    }

    /// Deadline applied when an example sets none.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.state.borrow().config.default_timeout
    }

    /// Set the fallback deadline of this scope.
    pub fn set_default_timeout(&self, timeout: Duration) {
        self.state.borrow_mut().config.default_timeout = Some(timeout);
    }

    /// Options merged under every connection-backed example's options.
    pub fn default_options(&self) -> Options {
        self.state.borrow().default_options.clone()
    }

    /// Replace the default options of this scope.
    pub fn set_default_options(&self, options: Options) {
        self.state.borrow_mut().default_options = options;
    }

    /// Edit the default options of this scope in place.
    pub fn update_default_options(&self, f: impl FnOnce(&mut Options)) {
        f(&mut self.state.borrow_mut().default_options);
    }

    /// Copy of this scope's metadata.
    pub fn metadata(&self) -> Metadata {
        self.state.borrow().metadata.clone()
    }

    /// Set one metadata entry of this scope.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state
            .borrow_mut()
            .metadata
            .insert(key.into(), value.into());
    }

    /// Make `operation` callable by name through `sync`.
    pub fn define_operation<F>(&self, name: impl Into<String>, operation: F)
    where
        F: Fn(&ExampleContext, SyncArgs, Completion) -> ExampleResult<()> + 'static,
    {
        self.state
            .borrow_mut()
            .operations
            .define(name, Rc::new(operation));
    }

    /// Collaborator connection-backed examples delegate to.
    pub fn set_connection_lifecycle(&self, lifecycle: Rc<dyn ConnectionLifecycle>) {
        self.state.borrow_mut().lifecycle = Some(lifecycle);
    }

    /// Mode [`ExampleGroup::run`] uses.
    pub fn mode(&self) -> ExampleMode {
        self.state.borrow().mode
    }

    /// Run every example of this scope through [`ExampleGroup::run`] in `mode`.
    pub fn set_mode(&self, mode: ExampleMode) {
        self.state.borrow_mut().mode = mode;
    }

    /// Run `body` inside a private reactor pass.
    ///
    /// `timeout` takes precedence over the scope's default timeout. A body
    /// that never calls `done` runs until its deadline; without one it
    /// never returns.
    #[instrument(skip_all, fields(group = %self.name()))]
    pub fn run_plain<F, Fut>(&self, timeout: Option<Duration>, body: F) -> ExampleResult<()>
    where
        F: FnOnce(ExampleContext) -> Fut + 'static,
        Fut: Future<Output = ExampleResult<()>> + 'static,
    {
        let plan = self.plan(ExampleMode::Plain, Options::new(), timeout);
        run_example(plan, boxed(body))
    }

    /// Run `body` inside a private reactor pass once a connection built
    /// from the scope's default options overlaid with `options` is up.
    ///
    /// A `spec_timeout` option beats `timeout`, which beats the scope's
    /// default timeout.
    #[instrument(skip_all, fields(group = %self.name()))]
    pub fn run_connection_backed<F, Fut>(
        &self,
        options: Options,
        timeout: Option<Duration>,
        body: F,
    ) -> ExampleResult<()>
    where
        F: FnOnce(ExampleContext) -> Fut + 'static,
        Fut: Future<Output = ExampleResult<()>> + 'static,
    {
        let plan = self.plan(ExampleMode::ConnectionBacked, options, timeout);
        run_example(plan, boxed(body))
    }

    /// Run `body` in the scope's configured mode.
    pub fn run<F, Fut>(&self, body: F) -> ExampleResult<()>
    where
        F: FnOnce(ExampleContext) -> Fut + 'static,
        Fut: Future<Output = ExampleResult<()>> + 'static,
    {
        match self.mode() {
            ExampleMode::Plain => self.run_plain(None, body),
            ExampleMode::ConnectionBacked => self.run_connection_backed(Options::new(), None, body),
        }
    }

    /// Snapshot of the scope for one example.
    fn plan(&self, mode: ExampleMode, options: Options, timeout: Option<Duration>) -> ExamplePlan {
        let state = self.state.borrow();
        let options = match mode {
            ExampleMode::Plain => options,
            ExampleMode::ConnectionBacked => state.default_options.merge(&options),
        };
        ExamplePlan {
            name: state.name.clone(),
            mode,
            clock: state.config.clock,
            hooks: state.hooks.clone(),
            lifecycle: state.lifecycle.clone(),
            operations: state.operations.clone(),
            options,
            timeout,
            default_timeout: state.config.default_timeout,
            metadata: state.metadata.clone(),
        }
    }
}

fn boxed<F, Fut>(body: F) -> Body
where
    F: FnOnce(ExampleContext) -> Fut + 'static,
    Fut: Future<Output = ExampleResult<()>> + 'static,
{
    Box::new(move |ctx| body(ctx).boxed_local())
}

//! The callback-style event loop examples run inside.
//!
//! A [`Reactor`] owns no thread. Each call to [`Reactor::run`] builds a
//! current-thread tokio runtime plus a `LocalSet`, runs the setup callback
//! as the first tick and keeps dispatching timers, ticks and local futures
//! until [`Reactor::stop`] is called. Everything still queued when the
//! pass ends is dropped with it.

use std::{
    cell::RefCell,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    rc::{Rc, Weak},
    time::Duration,
};

use futures::FutureExt;
use tidepool_core::{ExampleError, ReactorError};
use tokio::{
    sync::Notify,
    task::LocalSet,
    time::{Instant, MissedTickBehavior},
};
use tracing::instrument;

use super::{
    clock::ClockMode,
    timers::{TimerId, TimerRegistry},
};

/// Internal reactor state holder
pub(crate) struct ReactorInner {
    pub(crate) clock: ClockMode,
    pub(crate) running: bool,
    /// Set by `stop`; no further callbacks are dispatched once true.
    pub(crate) stopping: bool,
    /// First callback panic of the current pass.
    pub(crate) crash: Option<ExampleError>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) elapsed: Duration,
    pub(crate) timers: TimerRegistry,
    pub(crate) callbacks_run: u64,
    pub(crate) stop_signal: Rc<Notify>,
}

impl ReactorInner {
    fn new(clock: ClockMode) -> Self {
        Self {
            clock,
            running: false,
            stopping: false,
            crash: None,
            started_at: None,
            elapsed: Duration::ZERO,
            timers: TimerRegistry::default(),
            callbacks_run: 0,
            stop_signal: Rc::new(Notify::new()),
        }
    }

    /// Reset per-pass state. Returns the stop signal of the new pass.
    fn begin_pass(&mut self) -> Rc<Notify> {
        self.running = true;
        self.stopping = false;
        self.crash = None;
        self.started_at = None;
        self.elapsed = Duration::ZERO;
        self.callbacks_run = 0;
        self.stop_signal = Rc::new(Notify::new());
        self.stop_signal.clone()
    }
}

/// Single-threaded event loop driving one example at a time.
///
/// `Reactor` is a cheap handle: clones share the same loop. Callbacks
/// should capture a [`WeakReactor`] when they would otherwise keep the
/// loop alive through a cycle.
#[derive(Clone)]
pub struct Reactor {
    pub(crate) inner: Rc<RefCell<ReactorInner>>,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Reactor")
            .field("clock", &inner.clock)
            .field("running", &inner.running)
            .field("stopping", &inner.stopping)
            .field("pending_timers", &inner.timers.len())
            .finish()
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new(ClockMode::default())
    }
}

impl Reactor {
    /// Create an idle reactor using `clock`.
    pub fn new(clock: ClockMode) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ReactorInner::new(clock))),
        }
    }

    /// Clock used by this reactor's passes.
    pub fn clock(&self) -> ClockMode {
        self.inner.borrow().clock
    }

    /// Whether a pass is in progress, including while it winds down after
    /// [`Reactor::stop`].
    pub fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    /// Whether [`Reactor::stop`] has been requested for the current pass.
    pub fn is_stopping(&self) -> bool {
        self.inner.borrow().stopping
    }

    /// Time elapsed since the current pass started, or the length of the
    /// last pass once it is over.
    pub fn now(&self) -> Duration {
        let inner = self.inner.borrow();
        match (inner.running, inner.started_at) {
            (true, Some(started)) => started.elapsed(),
            _ => inner.elapsed,
        }
    }

    /// Number of callbacks dispatched during the current (or last) pass.
    pub fn callbacks_run(&self) -> u64 {
        self.inner.borrow().callbacks_run
    }

    /// Number of timers still pending.
    pub fn pending_timers(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    /// Creates a weak reference to this reactor.
    pub fn downgrade(&self) -> WeakReactor {
        WeakReactor {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Run one pass of the loop.
    ///
    /// `setup` runs as the first callback. The pass ends when
    /// [`Reactor::stop`] is called. If a callback panicked, the pass is
    /// stopped and the panic is returned as [`ExampleError::Panicked`].
    #[instrument(skip_all, fields(clock = %self.clock()))]
    pub fn run<F>(&self, setup: F) -> Result<(), ExampleError>
    where
        F: FnOnce(&Reactor) + 'static,
    {
        if self.is_running() {
            return Err(ReactorError::AlreadyRunning.into());
        }

        let clock = self.clock();
        let mut builder = tokio::runtime::Builder::new_current_thread();
        builder.enable_time();
        if clock.is_logical() {
            builder.start_paused(true);
        }
        let runtime = builder
            .build()
            .map_err(|e| ReactorError::Runtime(e.to_string()))?;
        let local = LocalSet::new();

        let signal = self.inner.borrow_mut().begin_pass();
        tracing::debug!("reactor pass started");

        let reactor = self.clone();
        local.block_on(&runtime, async move {
            reactor.inner.borrow_mut().started_at = Some(Instant::now());
            let handle = reactor.clone();
            reactor.dispatch(move || setup(&handle));
            signal.notified().await;

            let mut inner = reactor.inner.borrow_mut();
            inner.elapsed = inner
                .started_at
                .map(|started| started.elapsed())
                .unwrap_or_default();
        });

        let crash = {
            let mut inner = self.inner.borrow_mut();
            inner.running = false;
            inner.stopping = false;
            inner.timers.clear();
            inner.crash.take()
        };

        // Queued work is dropped inside the runtime so timer resources
        // deregister against the driver that created them.
        {
            let _guard = runtime.enter();
            drop(local);
        }
        drop(runtime);

        tracing::debug!(elapsed = ?self.now(), crashed = crash.is_some(), "reactor pass finished");
        match crash {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Request the end of the current pass.
    ///
    /// No further callbacks are dispatched; the pass returns as soon as
    /// control goes back to the loop. Calling it again is a no-op.
    pub fn stop(&self) {
        let signal = {
            let mut inner = self.inner.borrow_mut();
            if !inner.running || inner.stopping {
                return;
            }
            inner.stopping = true;
            inner.stop_signal.clone()
        };
        tracing::debug!("reactor stop requested");
        signal.notify_one();
    }

    /// Schedule `callback` to run once after `delay`.
    pub fn add_timer<F>(&self, delay: Duration, callback: F) -> Result<TimerId, ReactorError>
    where
        F: FnOnce() + 'static,
    {
        self.ensure_running()?;
        let id = self.inner.borrow_mut().timers.allocate();
        let weak = self.downgrade();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Ok(reactor) = weak.upgrade() {
                let claimed = reactor.inner.borrow_mut().timers.take_fired(id);
                if claimed {
                    tracing::trace!(%id, "timer fired");
                    reactor.dispatch(callback);
                }
            }
        });
        self.inner
            .borrow_mut()
            .timers
            .insert(id, handle.abort_handle());
        Ok(id)
    }

    /// Schedule `callback` to run every `interval` until cancelled.
    pub fn add_periodic_timer<F>(
        &self,
        interval: Duration,
        mut callback: F,
    ) -> Result<TimerId, ReactorError>
    where
        F: FnMut() + 'static,
    {
        self.ensure_running()?;
        let id = self.inner.borrow_mut().timers.allocate();
        let weak = self.downgrade();
        let handle = tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Ok(reactor) = weak.upgrade() else {
                    break;
                };
                if !reactor.inner.borrow().timers.contains(id) {
                    break;
                }
                reactor.dispatch(|| callback());
            }
        });
        self.inner
            .borrow_mut()
            .timers
            .insert(id, handle.abort_handle());
        Ok(id)
    }

    /// Cancel a pending timer.
    ///
    /// Returns `false` when the timer already fired or was cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let cancelled = self.inner.borrow_mut().timers.cancel(id);
        if cancelled {
            tracing::trace!(%id, "timer cancelled");
        }
        cancelled
    }

    /// Run `callback` on the next turn of the loop.
    pub fn next_tick<F>(&self, callback: F) -> Result<(), ReactorError>
    where
        F: FnOnce() + 'static,
    {
        self.ensure_running()?;
        let weak = self.downgrade();
        tokio::task::spawn_local(async move {
            if let Ok(reactor) = weak.upgrade() {
                reactor.dispatch(callback);
            }
        });
        Ok(())
    }

    /// Drive `future` on the loop. A panic inside it crashes the pass.
    pub fn spawn<F>(&self, future: F) -> Result<(), ReactorError>
    where
        F: Future<Output = ()> + 'static,
    {
        self.ensure_running()?;
        let weak = self.downgrade();
        tokio::task::spawn_local(async move {
            if let Err(payload) = AssertUnwindSafe(future).catch_unwind().await {
                if let Ok(reactor) = weak.upgrade() {
                    reactor.crash(ExampleError::from_panic(payload));
                }
            }
        });
        Ok(())
    }

    /// Wait for `duration` without blocking the loop.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ReactorError> {
        self.ensure_running()?;
        tokio::time::sleep(duration).await;
        Ok(())
    }

    /// Run a callback unless the pass is stopping, turning a panic into a
    /// crash of the pass.
    pub(crate) fn dispatch<F: FnOnce()>(&self, callback: F) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.stopping {
                tracing::trace!("reactor stopping, callback skipped");
                return;
            }
            inner.callbacks_run += 1;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            self.crash(ExampleError::from_panic(payload));
        }
    }

    /// Record `error` as the crash of this pass and stop it.
    pub(crate) fn crash(&self, error: ExampleError) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.crash.is_none() {
                tracing::debug!(%error, "reactor crashed");
                inner.crash = Some(error);
            } else {
                tracing::warn!(%error, "reactor already crashed, later failure dropped");
            }
        }
        self.stop();
    }

    fn ensure_running(&self) -> Result<(), ReactorError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ReactorError::NotRunning)
        }
    }
}

/// Weak handle to a [`Reactor`].
#[derive(Debug, Clone)]
pub struct WeakReactor {
    pub(crate) inner: Weak<RefCell<ReactorInner>>,
}

impl WeakReactor {
    /// Upgrade to a strong handle.
    pub fn upgrade(&self) -> Result<Reactor, ReactorError> {
        self.inner
            .upgrade()
            .map(|inner| Reactor { inner })
            .ok_or(ReactorError::Shutdown)
    }
}

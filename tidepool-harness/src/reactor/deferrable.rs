//! One-shot success/failure outcome with callbacks.
//!
//! A [`Deferrable`] is the callback-world counterpart of a future: code
//! under test hands one out, and whoever is interested registers
//! `callback`/`errback` closures. Closures registered after the outcome is
//! known run immediately.

use std::{cell::RefCell, fmt, rc::Rc, time::Duration};

use tidepool_core::{ExampleError, ReactorError};

use super::{timers::TimerId, world::Reactor};

/// Outcome of a [`Deferrable`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredStatus<T, E> {
    /// Not resolved yet.
    Pending,
    /// Resolved successfully.
    Succeeded(T),
    /// Resolved with an error.
    Failed(E),
}

type Callback<V> = Box<dyn FnOnce(V)>;

struct DeferrableInner<T, E> {
    status: DeferredStatus<T, E>,
    callbacks: Vec<Callback<T>>,
    errbacks: Vec<Callback<E>>,
    timeout: Option<TimerId>,
}

/// Cloneable handle on a one-shot outcome.
pub struct Deferrable<T, E = ExampleError> {
    inner: Rc<RefCell<DeferrableInner<T, E>>>,
}

impl<T, E> Clone for Deferrable<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Deferrable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferrable")
            .field("status", &self.inner.borrow().status)
            .finish()
    }
}

impl<T, E> Default for Deferrable<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deferrable<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Create a pending deferrable.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferrableInner {
                status: DeferredStatus::Pending,
                callbacks: Vec::new(),
                errbacks: Vec::new(),
                timeout: None,
            })),
        }
    }

    /// Current status.
    pub fn status(&self) -> DeferredStatus<T, E> {
        self.inner.borrow().status.clone()
    }

    /// Register a success callback.
    pub fn callback<F: FnOnce(T) + 'static>(&self, f: F) {
        let resolved = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            match &inner.status {
                DeferredStatus::Pending => {
                    inner.callbacks.push(Box::new(f));
                    return;
                }
                DeferredStatus::Succeeded(value) => Some(value.clone()),
                DeferredStatus::Failed(_) => None,
            }
        };
        if let Some(value) = resolved {
            f(value);
        }
    }

    /// Register a failure callback.
    pub fn errback<F: FnOnce(E) + 'static>(&self, f: F) {
        let resolved = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            match &inner.status {
                DeferredStatus::Pending => {
                    inner.errbacks.push(Box::new(f));
                    return;
                }
                DeferredStatus::Failed(error) => Some(error.clone()),
                DeferredStatus::Succeeded(_) => None,
            }
        };
        if let Some(error) = resolved {
            f(error);
        }
    }

    /// Resolve successfully. Ignored if already resolved.
    pub fn succeed(&self, value: T) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.status, DeferredStatus::Pending) {
                return;
            }
            inner.status = DeferredStatus::Succeeded(value.clone());
            inner.errbacks.clear();
            std::mem::take(&mut inner.callbacks)
        };
        for callback in callbacks {
            callback(value.clone());
        }
    }

    /// Resolve with an error. Ignored if already resolved.
    pub fn fail(&self, error: E) {
        let errbacks = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.status, DeferredStatus::Pending) {
                return;
            }
            inner.status = DeferredStatus::Failed(error.clone());
            inner.callbacks.clear();
            std::mem::take(&mut inner.errbacks)
        };
        for errback in errbacks {
            errback(error.clone());
        }
    }

    /// Fail with `error` unless resolved within `duration`.
    ///
    /// Setting a new timeout replaces the previous one.
    pub fn timeout(&self, reactor: &Reactor, duration: Duration, error: E) -> Result<(), ReactorError> {
        if let Some(previous) = self.inner.borrow_mut().timeout.take() {
            reactor.cancel_timer(previous);
        }
        let this = self.clone();
        let id = reactor.add_timer(duration, move || this.fail(error))?;
        self.inner.borrow_mut().timeout = Some(id);
        Ok(())
    }
}

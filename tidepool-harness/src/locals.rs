//! Values the hooks and the body of one example share.
//!
//! Slots are keyed by type, one value per type, so callers usually wrap
//! what they store in a small newtype. The store belongs to the execution:
//! every example starts empty and nothing survives its after hooks.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

#[derive(Default)]
pub(crate) struct ExampleLocals {
    slots: HashMap<TypeId, Box<dyn Any>>,
}

impl ExampleLocals {
    pub(crate) fn insert<T: 'static>(&mut self, value: T) -> Option<T> {
        self.slots
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub(crate) fn get<T: 'static>(&self) -> Option<&T> {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<T>())
    }

    pub(crate) fn remove<T: 'static>(&mut self) -> Option<T> {
        self.slots
            .remove(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Debug for ExampleLocals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExampleLocals")
            .field("slots", &self.len())
            .finish()
    }
}

//! Per-callback context store handed to listeners as their receiver

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Opaque store shared by every listener of one emission.
///
/// Listeners stash typed values here (the node an XHR was sent under, the
/// timer id a callback belongs to, ...). Cloning yields another handle to
/// the same store; identity is compared with [`Context::ptr_eq`].
#[derive(Clone, Default)]
pub struct Context {
    slots: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send>>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous one of the same type
    pub fn insert<T: Any + Send>(&self, value: T) -> Option<T> {
        self.slots
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Clone>(&self) -> Option<T> {
        self.slots
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    pub fn remove<T: Any + Send>(&self) -> Option<T> {
        self.slots
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn contains<T: Any + Send>(&self) -> bool {
        self.slots.lock().contains_key(&TypeId::of::<T>())
    }

    /// Mutate a slot in place, creating it from `Default` when absent
    pub fn update<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Default,
    {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        match slot.downcast_mut::<T>() {
            Some(value) => f(value),
            // TypeId keys guarantee the downcast; rebuild the slot if that ever breaks
            None => {
                let mut value = T::default();
                let out = f(&mut value);
                *slot = Box::new(value);
                out
            }
        }
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}

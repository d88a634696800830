//! Mutual-exclusion wrapper for shared mutable state.

use std::sync::{Mutex, MutexGuard};

/// A value guarded by a mutex with closure-scoped access.
///
/// The lock is never held across an `.await`: callers get the value only
/// inside a synchronous closure. A poisoned lock is recovered rather than
/// propagated, since every mutation leaves the value in a valid state.
#[derive(Debug, Default)]
pub struct AtomicVar<T> {
    inner: Mutex<T>,
}

impl<T> AtomicVar<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the value inside a closure.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the value inside a closure, returning the closure's result.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Replace the value, returning the previous one.
    pub fn set(&self, value: T) -> T {
        std::mem::replace(&mut *self.lock(), value)
    }
}

impl<T: Clone> AtomicVar<T> {
    /// Clone the current value out.
    pub fn value(&self) -> T {
        self.lock().clone()
    }
}

//! A typed, mutex-guarded cell — the design-level replacement for a
//! code-generated "sendable property" macro (spec §9).

use std::sync::Mutex;

/// A thread-safe property cell. Reads and writes are serialized through a
/// single mutex; it is not reentrant.
pub struct Cell<T> {
    inner: Mutex<T>,
}

impl<T> Cell<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Clone> Cell<T> {
    pub fn get(&self) -> T {
        self.lock().clone()
    }
}

impl<T> Cell<T> {
    pub fn set(&self, value: T) {
        *self.lock() = value;
    }

    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell").field("inner", &*self.lock()).finish()
    }
}

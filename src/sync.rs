//! Waitable - Condition-Variable-Guarded Value
//!
//! A mutex-protected payload paired with a condvar, so callers can mutate
//! the payload and block on predicates over it without repeating the
//! lock/wait boilerplate. Used for the monitor wake flag, the execution
//! counters, and the manager summary.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A value guarded by a mutex and a condition variable
pub struct Waitable<T> {
    inner: Mutex<T>,
    condvar: Condvar,
}

impl<T> Waitable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            condvar: Condvar::new(),
        }
    }

    /// Lock the payload directly. Callers that mutate through the guard
    /// must call `notify_all` afterwards to release any waiters.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Mutate the payload and wake all waiters
    pub fn apply<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.inner.lock());
        self.condvar.notify_all();
        result
    }

    /// Read the payload without waking anyone
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Block until the predicate holds
    pub fn wait_until(&self, mut predicate: impl FnMut(&T) -> bool) {
        let mut guard = self.inner.lock();
        while !predicate(&guard) {
            self.condvar.wait(&mut guard);
        }
    }

    /// Block until the predicate holds or the timeout elapses. Returns
    /// whether the predicate held when the wait ended.
    pub fn wait_for(&self, timeout: Duration, mut predicate: impl FnMut(&T) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock();
        while !predicate(&guard) {
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                return predicate(&guard);
            }
        }
        true
    }
}

impl<T: Default> Default for Waitable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

//! Executor Pool
//!
//! A fixed-capacity pool of reusable executor instances. Executors are
//! built lazily through the injected factory the first time a slot is
//! needed, then handed out and returned indefinitely, so VM setup cost is
//! paid at most `capacity` times per process. Releasing an executor fires
//! the shared wake signal so the monitor loop can dispatch deferred work
//! immediately instead of waiting out its poll interval.

use crate::executor::{Executor, ExecutorFactory};
use crate::sync::Waitable;
use parking_lot::Mutex;
use std::sync::Arc;

struct PoolInner<E> {
    idle: Vec<E>,
    built: usize,
}

/// Bounded pool of reusable executors
pub struct ExecutorPool<E: Executor> {
    inner: Mutex<PoolInner<E>>,
    capacity: usize,
    factory: ExecutorFactory<E>,
    wake: Arc<Waitable<bool>>,
}

impl<E: Executor> ExecutorPool<E> {
    pub fn new(capacity: usize, factory: ExecutorFactory<E>, wake: Arc<Waitable<bool>>) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                idle: Vec::with_capacity(capacity),
                built: 0,
            }),
            capacity: capacity.max(1),
            factory,
            wake,
        }
    }

    /// Take an idle executor, building one lazily while below capacity.
    /// Returns `None` when the pool is exhausted; callers defer dispatch
    /// until a release wakes them.
    pub fn acquire(&self) -> Option<E> {
        {
            let mut inner = self.inner.lock();
            if let Some(executor) = inner.idle.pop() {
                return Some(executor);
            }
            if inner.built >= self.capacity {
                return None;
            }
            inner.built += 1;
        }
        // slot reserved above; build outside the lock
        Some((self.factory)())
    }

    /// Return an executor to the idle set and wake the monitor
    pub fn release(&self, executor: E) {
        self.inner.lock().idle.push(executor);
        self.wake.apply(|pending| *pending = true);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    pub fn built_count(&self) -> usize {
        self.inner.lock().built
    }
}

//! Observable store state.
//!
//! Each store keeps its snapshot inside a `tokio::sync::watch` channel. Writers
//! mutate it in place with `modify`, and every receiver handed out by
//! `subscribe` is woken with the new snapshot. No lock is ever held across an
//! `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

pub struct Published<S> {
    tx: watch::Sender<S>,
}

impl<S> Published<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Run `f` against the current snapshot.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Mutate the snapshot and notify subscribers.
    pub fn modify(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_modify(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}

impl<S: Clone> Published<S> {
    pub fn get(&self) -> S {
        self.tx.borrow().clone()
    }
}

/// Monotonic request counter used to drop responses from superseded calls.
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    /// Issue a new generation, invalidating every earlier one.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.0.load(Ordering::SeqCst) == generation
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

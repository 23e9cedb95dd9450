//! Structured concurrency: a scope owns every task forked inside it.
//!
//! [`scoped`] runs a body with a [`Scope`] handle. Forks spawned through
//! the scope may borrow from the enclosing environment (the plumbing is
//! [`std::thread::scope`]); when the body returns, every fork still
//! running is interrupted, and the scope does not return before all of
//! them have finished. A fork that panics re-raises the panic out of
//! [`scoped`].

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, Mutex, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::task::{self, Task};

/// Runs `f` with a scope, interrupts whatever it left running, then waits
/// for all forks to finish before returning `f`'s result.
pub fn scoped<'env, F, R>(f: F) -> R
where
    F: for<'scope> FnOnce(&Scope<'scope, 'env>) -> R,
{
    let registry = Arc::new(Registry::default());
    thread::scope(|threads| {
        let scope = Scope { threads, registry };
        let out = f(&scope);
        // daemons get the interrupt here; the joins happen when the
        // std scope unwinds, so nothing outlives this call
        scope.registry.interrupt_all();
        out
    })
}

/// Capability to fork tasks that are cancelled when the scope ends.
///
/// The handle is cheap to clone and is passed again to every fork body,
/// so forks can nest.
pub struct Scope<'scope, 'env: 'scope> {
    threads: &'scope thread::Scope<'scope, 'env>,
    registry: Arc<Registry>,
}

impl<'scope, 'env> Clone for Scope<'scope, 'env> {
    fn clone(&self) -> Self {
        Scope {
            threads: self.threads,
            registry: self.registry.clone(),
        }
    }
}

impl<'scope, 'env> Scope<'scope, 'env> {
    /// Spawns `f` as a new task in this scope.
    ///
    /// The task starts immediately. Its result is retrieved with
    /// [`Fork::join`]; a task nobody joins is still interrupted and
    /// awaited at scope exit.
    pub fn fork<T, F>(&self, f: F) -> Fork<T>
    where
        T: Send + 'scope,
        F: FnOnce(&Scope<'scope, 'env>) -> T + Send + 'scope,
    {
        let state = Arc::new(ForkState::new());
        let entry = self.registry.register();
        let scope = self.clone();
        let fork_state = state.clone();
        self.threads.spawn(move || {
            let me = task::current();
            if scope.registry.bind(&entry, me.clone()) {
                // the scope was torn down before we got going
                me.set_interrupted();
            }
            let result = catch_unwind(AssertUnwindSafe(|| f(&scope)));
            entry.finished.store(true, Ordering::Release);
            match result {
                Ok(value) => fork_state.complete(value),
                Err(payload) => {
                    fork_state.poison();
                    resume_unwind(payload);
                }
            }
        });
        Fork { state }
    }
}

/// Registry of the tasks forked in a scope, consulted at teardown.
#[derive(Default)]
struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    cancelled: bool,
    entries: Vec<Arc<Entry>>,
}

#[derive(Default)]
struct Entry {
    task: OnceLock<Arc<Task>>,
    finished: AtomicBool,
}

impl Registry {
    fn register(&self) -> Arc<Entry> {
        let entry = Arc::new(Entry::default());
        self.inner.lock().unwrap().entries.push(entry.clone());
        entry
    }

    /// Records the task handle of a started fork. Returns whether the
    /// scope was already cancelled, in which case the fork interrupts
    /// itself (the teardown sweep may have run before the handle was
    /// visible). The registry lock orders the two against each other.
    fn bind(&self, entry: &Entry, me: Arc<Task>) -> bool {
        let inner = self.inner.lock().unwrap();
        let _ = entry.task.set(me);
        inner.cancelled
    }

    fn interrupt_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled = true;
        for entry in &inner.entries {
            if entry.finished.load(Ordering::Acquire) {
                continue;
            }
            if let Some(live) = entry.task.get() {
                live.interrupt();
            }
        }
    }
}

/// Handle to a forked task; yields its result.
pub struct Fork<T> {
    state: Arc<ForkState<T>>,
}

struct ForkState<T> {
    inner: Mutex<ForkInner<T>>,
}

struct ForkInner<T> {
    slot: ForkSlot<T>,
    waiters: Vec<Arc<Task>>,
}

enum ForkSlot<T> {
    Running,
    Finished(T),
    Panicked,
}

impl<T> ForkState<T> {
    fn new() -> Self {
        ForkState {
            inner: Mutex::new(ForkInner {
                slot: ForkSlot::Running,
                waiters: Vec::new(),
            }),
        }
    }

    fn complete(&self, value: T) {
        self.finish(ForkSlot::Finished(value));
    }

    fn poison(&self) {
        self.finish(ForkSlot::Panicked);
    }

    fn finish(&self, slot: ForkSlot<T>) {
        let mut inner = self.inner.lock().unwrap();
        inner.slot = slot;
        for waiter in inner.waiters.drain(..) {
            waiter.unpark();
        }
    }
}

impl<T> Fork<T> {
    /// Blocks until the task finishes and returns its value.
    ///
    /// # Panics
    ///
    /// Panics if the forked task panicked. The original panic also
    /// propagates out of [`scoped`] when the scope joins the task.
    pub fn join(self) -> T {
        let me = task::current();
        loop {
            {
                let mut inner = self.state.inner.lock().unwrap();
                match std::mem::replace(&mut inner.slot, ForkSlot::Running) {
                    ForkSlot::Finished(value) => return value,
                    ForkSlot::Panicked => panic!("forked task panicked"),
                    ForkSlot::Running => inner.waiters.push(me.clone()),
                }
            }
            task::park();
        }
    }
}

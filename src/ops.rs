//! Source operators and factories.
//!
//! Every operator forks exactly one worker task in the caller's scope
//! and hands back a fresh rendezvous channel fed by that worker. The
//! workers own no state beyond the channels they bridge; composition is
//! plain channel plumbing.
//!
//! Failure policy: a panic in user code closes the downstream channel as
//! an error carrying the panic message; an upstream error is forwarded
//! as-is; an interrupted worker closes its downstream as done.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::{Channel, Closed, ReceiveError};
use crate::scope::Scope;
use crate::select::select;
use crate::source::Source;
use crate::task;

impl<T> Channel<T> {
    /// One-to-one transform. A panic in `f` closes the output as an
    /// error.
    pub fn map<'scope, 'env, U, F>(&self, scope: &Scope<'scope, 'env>, mut f: F) -> Channel<U>
    where
        T: Send + 'scope,
        U: Send + 'scope,
        F: FnMut(T) -> U + Send + 'scope,
    {
        let input = self.clone();
        let output = Channel::new(1);
        let out = output.clone();
        scope.fork(move |_| {
            loop {
                match input.receive() {
                    Ok(value) => {
                        let mapped = match catch_unwind(AssertUnwindSafe(|| f(value))) {
                            Ok(mapped) => mapped,
                            Err(payload) => {
                                let _ = out.error(panic_message(payload));
                                return;
                            }
                        };
                        if out.send(mapped).is_err() {
                            return;
                        }
                    }
                    Err(reason) => {
                        finish(&out, reason);
                        return;
                    }
                }
            }
        });
        output
    }

    /// Exposes the input as a pull-based iterator, runs the
    /// user-supplied transform over it, and relays whatever the returned
    /// iterator yields.
    ///
    /// The [`Incoming`] iterator ends when the input closes; if the
    /// input failed (or the worker was interrupted mid-pull), the state
    /// is propagated downstream after the user's iterator is exhausted.
    pub fn transform<'scope, 'env, U, I, F>(&self, scope: &Scope<'scope, 'env>, f: F) -> Channel<U>
    where
        T: Send + 'scope,
        U: Send + 'scope,
        I: IntoIterator<Item = U>,
        F: FnOnce(Incoming<T>) -> I + Send + 'scope,
    {
        let input = self.clone();
        let output = Channel::new(1);
        let out = output.clone();
        scope.fork(move |_| {
            let ended = Arc::new(Mutex::new(None));
            let incoming = Incoming {
                channel: input,
                ended: ended.clone(),
            };
            let drove = catch_unwind(AssertUnwindSafe(|| {
                for value in f(incoming) {
                    if out.send(value).is_err() {
                        break;
                    }
                }
            }));
            match drove {
                Err(payload) => {
                    let _ = out.error(panic_message(payload));
                }
                Ok(()) => match ended.lock().unwrap().take() {
                    Some(reason) => finish(&out, reason),
                    None => {
                        let _ = out.done();
                    }
                },
            }
        });
        output
    }

    /// Applies `f` to every element in the calling task. `Done` is the
    /// normal ending.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), ReceiveError>
    where
        F: FnMut(T),
    {
        loop {
            match self.receive() {
                Ok(value) => f(value),
                Err(ReceiveError::Done) => return Ok(()),
                Err(reason) => return Err(reason),
            }
        }
    }

    /// Collects every element until the source is done.
    pub fn to_list(&self) -> Result<Vec<T>, ReceiveError> {
        let mut list = Vec::new();
        self.for_each(|value| list.push(value))?;
        Ok(list)
    }

    /// Relays whichever of the two sources has an element, until either
    /// reaches its terminal state; that state closes the output.
    /// Fairness between the inputs is unspecified.
    pub fn merge<'scope, 'env>(&self, scope: &Scope<'scope, 'env>, other: &Channel<T>) -> Channel<T>
    where
        T: Send + 'scope,
    {
        let left = self.clone();
        let right = other.clone();
        let output = Channel::new(1);
        let out = output.clone();
        scope.fork(move |_| {
            loop {
                match select(&[&left, &right]) {
                    Ok(value) => {
                        if out.send(value).is_err() {
                            return;
                        }
                    }
                    Err(reason) => {
                        finish(&out, reason);
                        return;
                    }
                }
            }
        });
        output
    }

    /// Pairs one element from each source per output element; the first
    /// source to close ends the stream.
    pub fn zip<'scope, 'env, U>(
        &self,
        scope: &Scope<'scope, 'env>,
        other: &Channel<U>,
    ) -> Channel<(T, U)>
    where
        T: Send + 'scope,
        U: Send + 'scope,
    {
        let left = self.clone();
        let right = other.clone();
        let output = Channel::new(1);
        let out = output.clone();
        scope.fork(move |_| {
            loop {
                let first = match left.receive() {
                    Ok(value) => value,
                    Err(reason) => {
                        finish(&out, reason);
                        return;
                    }
                };
                let second = match right.receive() {
                    Ok(value) => value,
                    Err(reason) => {
                        finish(&out, reason);
                        return;
                    }
                };
                if out.send((first, second)).is_err() {
                    return;
                }
            }
        });
        output
    }
}

/// Blocking iterator over a channel's elements, handed to
/// [`Channel::transform`] transforms. Iteration ends at the channel's
/// terminal state.
pub struct Incoming<T> {
    channel: Channel<T>,
    ended: Arc<Mutex<Option<ReceiveError>>>,
}

impl<T> Iterator for Incoming<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.channel.receive() {
            Ok(value) => Some(value),
            Err(ReceiveError::Done) => None,
            Err(reason) => {
                *self.ended.lock().unwrap() = Some(reason);
                None
            }
        }
    }
}

/// Drains `items` into a fresh channel, then closes it as done. A panic
/// while iterating closes the channel as an error instead.
pub fn from<'scope, 'env, T, I>(scope: &Scope<'scope, 'env>, items: I) -> Channel<T>
where
    T: Send + 'scope,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'scope,
{
    let output = Channel::new(1);
    let out = output.clone();
    let iter = items.into_iter();
    scope.fork(move |_| {
        let drove = catch_unwind(AssertUnwindSafe(|| {
            for value in iter {
                if out.send(value).is_err() {
                    break;
                }
            }
        }));
        match drove {
            Ok(()) => {
                let _ = out.done();
            }
            Err(payload) => {
                let _ = out.error(panic_message(payload));
            }
        }
    });
    output
}

/// Emits a clone of `element` every `interval`, forever. The stream
/// never closes on its own; tearing down the scope ends it.
pub fn tick<'scope, 'env, T>(
    scope: &Scope<'scope, 'env>,
    interval: Duration,
    element: T,
) -> Channel<T>
where
    T: Clone + Send + 'scope,
{
    let output = Channel::new(1);
    let out = output.clone();
    scope.fork(move |_| {
        loop {
            if out.send(element.clone()).is_err() {
                let _ = out.done();
                return;
            }
            if task::sleep(interval).is_err() {
                let _ = out.done();
                return;
            }
        }
    });
    output
}

/// Emits `element` once after `interval`, then closes as done.
pub fn timeout<'scope, 'env, T>(
    scope: &Scope<'scope, 'env>,
    interval: Duration,
    element: T,
) -> Channel<T>
where
    T: Send + 'scope,
{
    let output = Channel::new(1);
    let out = output.clone();
    scope.fork(move |_| {
        if task::sleep(interval).is_ok() {
            let _ = out.send(element);
        }
        let _ = out.done();
    });
    output
}

/// Closes `out` the way the upstream ended: errors carry their cause
/// across, everything else (done, or a worker interrupted while parked)
/// becomes a plain done.
fn finish<T>(out: &Channel<T>, reason: ReceiveError) {
    match reason {
        ReceiveError::Error(cause) => {
            let _ = out.close_with(Closed::Error(cause));
        }
        ReceiveError::Done | ReceiveError::Interrupted => {
            let _ = out.done();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker task panicked".to_string()
    }
}

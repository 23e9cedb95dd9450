//! The single-use rendezvous slot mediating every blocking handoff.
//!
//! A [`Cell`] is created by a party that found no immediate rendezvous
//! and is enqueued on the waiter list of one or more channels. Whoever
//! wins the ownership flag earns the exclusive right to complete it with
//! exactly one payload; the creating task is the only one that ever
//! takes the payload out.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::CachePadded;

use crate::channel::error::Closed;
use crate::task::{self, Interrupted, Task};

/// What an owner deposits into a cell.
pub(crate) enum Payload<T> {
    /// A delivered element.
    Value(T),
    /// The owner had nothing to deliver; wait on this cell instead.
    Forward(Arc<Cell<T>>),
    /// The channel reached its terminal state while the waiter was parked.
    Closed(Closed),
}

/// A one-shot handoff slot with an ownership flag.
///
/// Flag protocol:
/// - Initial: un-owned; any task may attempt the claim.
/// - `try_own` flips it false→true exactly once; the winner must deposit
///   exactly one payload via `put` or `put_forward`.
/// - Losers walk away; a channel probing an owned cell just drops it.
///
/// The flag CAS is the only ordering-critical operation in the handoff:
/// the winner's deposit happens-before the waiter's take through the
/// slot mutex.
pub struct Cell<T> {
    owned: CachePadded<AtomicBool>,
    slot: Mutex<Option<Payload<T>>>,
    waiter: Arc<Task>,
}

impl<T> Cell<T> {
    /// A fresh cell whose waiter is the calling task.
    pub(crate) fn new() -> Arc<Self> {
        Self::with_waiter(task::current())
    }

    fn with_waiter(waiter: Arc<Task>) -> Arc<Self> {
        Arc::new(Cell {
            owned: CachePadded::new(AtomicBool::new(false)),
            slot: Mutex::new(None),
            waiter,
        })
    }

    /// Claims the cell. The winner must complete it; everyone else must
    /// leave it alone.
    pub(crate) fn try_own(&self) -> bool {
        self.owned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    /// Deposits the payload and wakes the waiter. Owner-only, called at
    /// most once per cell.
    pub(crate) fn put(&self, payload: Payload<T>) {
        let mut slot = self.slot.lock().unwrap();
        debug_assert!(slot.is_none(), "cell completed twice");
        *slot = Some(payload);
        drop(slot);
        self.waiter.unpark();
    }

    /// Completes this cell with a forwarding pointer to a fresh cell
    /// carrying the same waiter, and returns the replacement so the
    /// owner can re-enqueue it.
    pub(crate) fn put_forward(self: &Arc<Self>) -> Arc<Cell<T>> {
        let next = Cell::with_waiter(self.waiter.clone());
        self.put(Payload::Forward(next.clone()));
        next
    }

    /// Parks until the payload arrives, observing interruption.
    pub(crate) fn take(&self) -> Result<Payload<T>, Interrupted> {
        loop {
            if let Some(payload) = self.slot.lock().unwrap().take() {
                return Ok(payload);
            }
            task::check_interrupt()?;
            task::park();
        }
    }

    /// Parks until the payload arrives, ignoring interruption. Only
    /// valid once the cell is known to be owned: the owner's deposit is
    /// imminent and must be honored.
    pub(crate) fn take_completed(&self) -> Payload<T> {
        loop {
            if let Some(payload) = self.slot.lock().unwrap().take() {
                return payload;
            }
            task::park();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// However many tasks race for a cell, exactly one wins the claim.
    #[test]
    fn single_owner_under_contention() {
        let cell = Cell::<i32>::new();
        let wins = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    if cell.try_own() {
                        wins.fetch_add(1, Ordering::SeqCst);
                        cell.put(Payload::Value(1));
                    }
                });
            }
        });
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    /// A deposited value wakes the parked waiter.
    #[test]
    fn put_wakes_take() {
        let cell = Cell::<i32>::new();
        thread::scope(|s| {
            let completer = cell.clone();
            s.spawn(move || {
                thread::sleep(std::time::Duration::from_millis(20));
                assert!(completer.try_own());
                completer.put(Payload::Value(7));
            });
            match cell.take() {
                Ok(Payload::Value(v)) => assert_eq!(v, 7),
                _ => panic!("expected a value"),
            }
        });
    }

    /// A forward chain hands the waiter from cell to cell.
    #[test]
    fn forward_chain_reaches_the_value() {
        let first = Cell::<i32>::new();
        assert!(first.try_own());
        let second = first.put_forward();
        assert!(second.try_own());
        second.put(Payload::Value(9));

        let mut cell = first;
        loop {
            match cell.take().unwrap() {
                Payload::Forward(next) => cell = next,
                Payload::Value(v) => {
                    assert_eq!(v, 9);
                    break;
                }
                Payload::Closed(_) => panic!("unexpected close"),
            }
        }
    }
}

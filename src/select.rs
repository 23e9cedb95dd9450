//! Multi-source receive with at-most-one delivery.
//!
//! [`select_now`] is the lock-free fast path: an in-order scan of the
//! sources' buffers. [`select`] falls back to registering one shared
//! [`Cell`] on every source; whichever sender (or closer) wins the
//! cell's ownership flag delivers through it, and everyone else backs
//! off. Fairness between sources is deliberately unspecified: the scan
//! is list-order, and callers that need rotation do it themselves.

use std::sync::Arc;

use crate::cell::{Cell, Payload};
use crate::channel::ReceiveError;
use crate::source::Source;
use crate::task;

/// Polls the sources in order and returns the first buffered element,
/// if any. Never blocks, never touches the waiter lists.
pub fn select_now<T, S>(sources: &[&S]) -> Option<T>
where
    S: Source<Item = T> + ?Sized,
{
    sources.iter().find_map(|source| source.element_poll())
}

/// Receives exactly one element (or the terminal state) from one of the
/// sources, blocking until something is available.
///
/// # Panics
///
/// Panics if `sources` is empty.
pub fn select<T, S>(sources: &[&S]) -> Result<T, ReceiveError>
where
    S: Source<Item = T> + ?Sized,
{
    assert!(!sources.is_empty(), "select requires at least one source");
    loop {
        if let Some(value) = select_now(sources) {
            return Ok(value);
        }
        let cell = Cell::new();
        for source in sources {
            source.cell_offer(cell.clone());
        }
        // an element published between the scan and the offers would
        // leave us parked next to deliverable data; claim the cell back
        // and rescan
        if sources.iter().any(|source| source.element_peek()) && cell.try_own() {
            cleanup(sources, &cell, true);
            continue;
        }
        return take_from_cell(sources, cell);
    }
}

/// Waits on a registered cell, following forwarding pointers
/// iteratively until a value or terminal state comes out.
///
/// Interruption is a race against the completer: if we claim the cell
/// first nothing was delivered and the interrupt propagates; if the
/// completer claimed it first we wait out the deposit, re-arm the
/// interrupt flag, and honor the payload (a delivered element is never
/// discarded).
fn take_from_cell<T, S>(sources: &[&S], mut cell: Arc<Cell<T>>) -> Result<T, ReceiveError>
where
    S: Source<Item = T> + ?Sized,
{
    let mut interrupted = false;
    loop {
        let payload = if interrupted {
            if cell.try_own() {
                cleanup(sources, &cell, false);
                return Err(ReceiveError::Interrupted);
            }
            cell.take_completed()
        } else {
            match cell.take() {
                Ok(payload) => payload,
                Err(_) => {
                    interrupted = true;
                    continue;
                }
            }
        };
        match payload {
            Payload::Value(value) => {
                cleanup(sources, &cell, false);
                if interrupted {
                    task::set_interrupted();
                }
                return Ok(value);
            }
            Payload::Forward(next) => {
                cleanup(sources, &cell, false);
                cell = next;
            }
            Payload::Closed(state) => {
                cleanup(sources, &cell, false);
                if interrupted {
                    task::set_interrupted();
                }
                return Err(state.into());
            }
        }
    }
}

/// Removes a defunct cell from every participating source. With a single
/// source the removal is skipped (the channel recognizes the owned cell
/// and drops it on its next probe), except right after a
/// self-invalidation, where the rescan could otherwise meet its own
/// stale cell.
fn cleanup<T, S>(sources: &[&S], cell: &Arc<Cell<T>>, also_when_single: bool)
where
    S: Source<Item = T> + ?Sized,
{
    if sources.len() == 1 && !also_when_single {
        return;
    }
    for source in sources {
        source.cell_cleanup(cell);
    }
}

//! The seams between channels and the code that drives them.
//!
//! [`Source`] is what [`select`](crate::select::select) operates over:
//! besides [`receive`](Source::receive) it carries the low-level probes
//! the rendezvous protocol is built from. Those primitives are of no use
//! outside the crate (a [`Cell`] cannot be completed by foreign code),
//! so the trait is sealed: [`Channel`] is the only implementor.

use std::sync::Arc;

use crate::cell::Cell;
use crate::channel::{Channel, ReceiveError, SendError};
use crate::select::select;

mod sealed {
    pub trait Sealed {}
    impl<T> Sealed for crate::channel::Channel<T> {}
}

/// Something elements can be received from, possibly as one arm of a
/// `select`.
pub trait Source: sealed::Sealed {
    type Item;

    /// Non-blocking removal of the oldest buffered element.
    fn element_poll(&self) -> Option<Self::Item>;

    /// Whether a buffered element is currently present.
    fn element_peek(&self) -> bool;

    /// Registers a waiting cell at the tail of the waiter list.
    fn cell_offer(&self, cell: Arc<Cell<Self::Item>>);

    /// Unregisters a defunct cell, wherever it sits in the waiter list.
    fn cell_cleanup(&self, cell: &Arc<Cell<Self::Item>>);

    /// Blocking receive: `select` over this source alone. There is no
    /// shortcut past the waiter list; a lone receiver and a `select`
    /// arm take the identical path.
    fn receive(&self) -> Result<Self::Item, ReceiveError>
    where
        Self: Sized,
    {
        select(&[self])
    }
}

/// Something elements can be sent into.
pub trait Sink: sealed::Sealed {
    type Item;

    fn send(&self, value: Self::Item) -> Result<(), SendError<Self::Item>>;
}

impl<T> Source for Channel<T> {
    type Item = T;

    fn element_poll(&self) -> Option<T> {
        self.element_poll_inner()
    }

    fn element_peek(&self) -> bool {
        self.element_peek_inner()
    }

    fn cell_offer(&self, cell: Arc<Cell<T>>) {
        self.cell_offer_inner(cell);
    }

    fn cell_cleanup(&self, cell: &Arc<Cell<T>>) {
        self.cell_cleanup_inner(cell);
    }
}

impl<T> Sink for Channel<T> {
    type Item = T;

    fn send(&self, value: T) -> Result<(), SendError<T>> {
        Channel::send(self, value)
    }
}

//! Rendezvous channels with multi-channel select
//!
//! A synchronous channel for lightweight preemptive tasks: senders and
//! receivers meet on a bounded FIFO, and a receiver may wait on several
//! channels at once through [`select()`], which delivers *at most one*
//! element no matter how many senders race for it.
//!
//! ## The handoff protocol
//!
//! A party that finds no immediate rendezvous parks on a [`Cell`]: a
//! single-use slot with an ownership flag. Claiming the flag is a single
//! compare-and-swap, and the winner owes the waiter exactly one payload.
//! The same cell can sit on the waiter list of every channel in a
//! `select`, which is what makes multi-channel waits safe: whichever
//! channel completes the cell first wins, and the others see an owned
//! cell and drop it.
//!
//! ## Structured concurrency
//!
//! Channels are shared freely, but the tasks driving them live in a
//! [`scoped`] block: when the body returns, every forked task still
//! running is interrupted and awaited. Blocked sends, receives and
//! sleeps all observe the interrupt. The [operators](Channel::map) fork
//! their workers into the caller's scope, so a pipeline can never leak a
//! task past its scope.
//!
//! ## Closing
//!
//! A channel closes exactly once, as [`done`](Channel::done) or as an
//! [`error`](Channel::error) with a shared cause; either state is sticky
//! and buffered elements stay receivable until drained.
//!
//! ## Example
//!
//!```
//! use rendez::{Channel, scoped, select};
//!
//! // a pipeline of operator workers, all owned by the scope
//! let doubled = scoped(|s| rendez::from(s, [1, 2, 3]).map(s, |v| v * 2).to_list().unwrap());
//! assert_eq!(doubled, vec![2, 4, 6]);
//!
//! // select takes the first buffered element in scan order
//! let a = Channel::<i32>::new(1);
//! let b = Channel::<i32>::new(1);
//! b.send(7).unwrap();
//! assert_eq!(select(&[&a, &b]).unwrap(), 7);
//! ```

mod cell;
mod channel;
mod ops;
mod scope;
mod select;
mod source;
pub mod task;

pub use cell::Cell;
pub use channel::{Cause, Channel, Closed, ReceiveError, SendError};
pub use ops::{Incoming, from, tick, timeout};
pub use scope::{Fork, Scope, scoped};
pub use select::{select, select_now};
pub use source::{Sink, Source};
pub use task::Interrupted;

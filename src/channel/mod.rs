//! Rendezvous channel: a bounded element queue loosely coupled to a
//! waiter list.
//!
//! ## How a handoff works
//!
//!```text
//!              send(t)                          receive()
//!                 │                                 │
//!     ┌───────────▼───────────┐         ┌───────────▼───────────┐
//!     │ 1. claim a waiting    │         │ 1. poll an element    │
//!     │    cell, deliver t    │         │    (select fast path) │
//!     │ 2. else buffer t      │         │ 2. else enqueue a     │
//!     │ 3. re-pair buffer and │         │    fresh cell and     │
//!     │    waiters            │         │    park on it         │
//!     └───────────┬───────────┘         └───────────┬───────────┘
//!                 │                                 │
//!          ┌──────▼──────┐                  ┌───────▼───────┐
//!          │  elements   │                  │    waiting    │
//!          │ bounded FIFO│                  │ deque of cells│
//!          └─────────────┘                  └───────────────┘
//!```
//!
//! The two structures are mutated independently; the invariant that
//! survives every interleaving is that *at quiescence either `elements`
//! is empty or every cell in `waiting` is already owned*. Two motions
//! restore it when it wobbles: the sender's re-pairing pass (step 3
//! above) and the receiver's post-offer re-check in
//! [`select`](crate::select::select). Both are expressed through the
//! ownership CAS on [`Cell`](crate::cell::Cell), never through a lock
//! held across a suspension.
//!
//! ## Closing
//!
//! [`Channel::done`] and [`Channel::error`] install a sticky terminal
//! state: parked senders are released, parked waiters are completed with
//! the terminal payload, and buffered elements remain receivable until
//! drained. Every later consumer observes the same state.
//!
//! ## Example
//!
//!```
//! use rendez::{Channel, Source, scoped};
//!
//! let ch = Channel::<i32>::default();
//! let sum = scoped(|s| {
//!     let ch2 = ch.clone();
//!     s.fork(move |_| {
//!         for i in 1..=10 {
//!             ch2.send(i).unwrap();
//!         }
//!         ch2.done().unwrap();
//!     });
//!     let mut sum = 0;
//!     while let Ok(v) = ch.receive() {
//!         sum += v;
//!     }
//!     sum
//! });
//! assert_eq!(sum, 55);
//! ```

mod buffer;
pub(crate) mod error;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use crossbeam_utils::CachePadded;

use crate::cell::{Cell, Payload};
use buffer::Buffer;
pub use error::{Cause, Closed, ReceiveError, SendError};

/// A bounded rendezvous channel, cheap to clone and share among any
/// number of sending and receiving tasks.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    elements: CachePadded<Buffer<T>>,
    /// Waiting cells in arrival order. Forward cells go back to the
    /// head so earlier waiters stay earlier.
    waiting: CachePadded<Mutex<VecDeque<Arc<Cell<T>>>>>,
    closed: OnceLock<Closed>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<T> Channel<T> {
    /// Creates a channel buffering up to `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "capacity must be at least 1");
        Channel {
            inner: Arc::new(Inner {
                elements: CachePadded::new(Buffer::new(capacity)),
                waiting: CachePadded::new(Mutex::new(VecDeque::new())),
                closed: OnceLock::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.elements.capacity()
    }

    /// Whether a terminal state has been installed. Buffered elements
    /// may still be receivable.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get().is_some()
    }

    /// Delivers one element to exactly one receiver.
    ///
    /// Pairs directly with a waiting receiver when one is parked;
    /// otherwise buffers the element, blocking while the buffer is full.
    /// On failure the element is handed back inside the error.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.is_closed() {
            return Err(SendError::Closed(value));
        }
        // pair with the first waiter we can claim
        while let Some(cell) = self.poll_waiting() {
            if cell.try_own() {
                cell.put(Payload::Value(value));
                return Ok(());
            }
            // already claimed elsewhere, drop it and probe again
        }
        self.inner.elements.put(value)?;
        // publishing an element may have raced a fresh waiter in
        self.repair();
        Ok(())
    }

    /// Collapses the transient state where buffered elements and
    /// un-owned waiters coexist: deliver elements to claimable cells
    /// until one side runs dry. A claim whose element vanished is
    /// redirected through a forward cell pushed back to the head, so
    /// waiter order survives.
    fn repair(&self) {
        loop {
            if self.inner.elements.is_empty() {
                return;
            }
            let Some(cell) = self.poll_waiting() else {
                return;
            };
            if !cell.try_own() {
                continue;
            }
            match self.inner.elements.poll() {
                Some(value) => cell.put(Payload::Value(value)),
                None => {
                    let next = cell.put_forward();
                    self.inner.waiting.lock().unwrap().push_front(next);
                }
            }
        }
    }

    /// Closes the channel normally. Fails with the prior state if a
    /// terminal state was already installed.
    pub fn done(&self) -> Result<(), Closed> {
        self.close(Closed::Done)
    }

    /// Closes the channel with a failure every consumer will observe.
    pub fn error(&self, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Result<(), Closed> {
        self.close(Closed::Error(Arc::from(cause.into())))
    }

    /// Closes the channel with an already-shared cause. Operators use
    /// this to propagate an upstream failure without re-wrapping it.
    pub(crate) fn close_with(&self, state: Closed) -> Result<(), Closed> {
        self.close(state)
    }

    fn close(&self, mut state: Closed) -> Result<(), Closed> {
        loop {
            if let Some(prior) = self.inner.closed.get() {
                return Err(prior.clone());
            }
            match self.inner.closed.set(state) {
                Ok(()) => {
                    self.inner.elements.close();
                    self.drain_waiting();
                    return Ok(());
                }
                // lost the install race; report the winner
                Err(rejected) => state = rejected,
            }
        }
    }

    /// Completes every claimable waiting cell: with a buffered element
    /// when one is still available, with the terminal state otherwise.
    fn drain_waiting(&self) {
        let Some(state) = self.inner.closed.get() else {
            return;
        };
        while let Some(cell) = self.poll_waiting() {
            if !cell.try_own() {
                continue;
            }
            match self.inner.elements.poll() {
                Some(value) => cell.put(Payload::Value(value)),
                None => cell.put(Payload::Closed(state.clone())),
            }
        }
    }

    fn poll_waiting(&self) -> Option<Arc<Cell<T>>> {
        self.inner.waiting.lock().unwrap().pop_front()
    }

    // Package primitives backing `Source` and `select`.

    pub(crate) fn element_poll_inner(&self) -> Option<T> {
        self.inner.elements.poll()
    }

    pub(crate) fn element_peek_inner(&self) -> bool {
        self.inner.elements.peek()
    }

    pub(crate) fn cell_offer_inner(&self, cell: Arc<Cell<T>>) {
        self.inner.waiting.lock().unwrap().push_back(cell);
        // a close racing with the offer might have swept before the cell
        // was visible; drain again now that it is
        if self.is_closed() {
            self.drain_waiting();
        }
    }

    pub(crate) fn cell_cleanup_inner(&self, cell: &Arc<Cell<T>>) {
        let mut waiting = self.inner.waiting.lock().unwrap();
        if let Some(at) = waiting.iter().position(|c| Arc::ptr_eq(c, cell)) {
            waiting.remove(at);
        }
    }

    /// Test probe for the coupling invariant: at quiescence either the
    /// buffer is empty or every waiting cell is owned.
    #[cfg(test)]
    pub(crate) fn coupling_holds(&self) -> bool {
        let waiting = self.inner.waiting.lock().unwrap();
        self.inner.elements.is_empty() || waiting.iter().all(|c| c.is_owned())
    }

    #[cfg(test)]
    pub(crate) fn waiting_len(&self) -> usize {
        self.inner.waiting.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::scoped;
    use crate::select::select_now;
    use crate::source::Source;
    use crate::task;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Single sender, single receiver: received order equals sent order.
    #[test]
    fn fifo_single_pair() {
        let ch = Channel::<usize>::new(1);
        let received = scoped(|s| {
            let tx = ch.clone();
            s.fork(move |_| {
                for i in 0..1000 {
                    tx.send(i).unwrap();
                }
                tx.done().unwrap();
            });
            let mut out = Vec::new();
            while let Ok(v) = ch.receive() {
                out.push(v);
            }
            out
        });
        assert_eq!(received, (0..1000).collect::<Vec<_>>());
    }

    /// Scenario: one sender streams 1..=N, one receiver sums; nothing is
    /// lost or duplicated on the way.
    #[test]
    fn ten_million_element_sum() {
        const N: u64 = 10_000_000;
        let ch = Channel::<u64>::new(8192);
        let sum = scoped(|s| {
            let tx = ch.clone();
            s.fork(move |_| {
                for i in 1..=N {
                    tx.send(i).unwrap();
                }
                tx.done().unwrap();
            });
            let mut sum = 0u64;
            while let Ok(v) = ch.receive() {
                sum += v;
            }
            sum
        });
        assert_eq!(sum, N * (N + 1) / 2);
    }

    /// Many senders and receivers on one channel: the union of received
    /// elements is exactly the multiset sent.
    #[test]
    fn conservation_under_contention() {
        let senders = num_cpus::get().clamp(2, 8);
        let receivers = num_cpus::get().clamp(2, 8);
        let per_sender = 2000usize;
        let ch = Channel::<usize>::new(4);

        let collected = scoped(|s| {
            let mut producing = Vec::new();
            for i in 0..senders {
                let tx = ch.clone();
                producing.push(s.fork(move |_| {
                    for v in i * per_sender..(i + 1) * per_sender {
                        tx.send(v).unwrap();
                    }
                }));
            }
            let mut consuming = Vec::new();
            for _ in 0..receivers {
                let rx = ch.clone();
                consuming.push(s.fork(move |_| {
                    let mut got = Vec::new();
                    while let Ok(v) = rx.receive() {
                        got.push(v);
                    }
                    got
                }));
            }
            for fork in producing {
                fork.join();
            }
            ch.done().unwrap();
            let mut all = Vec::new();
            for fork in consuming {
                all.extend(fork.join());
            }
            all
        });

        let unique: HashSet<_> = collected.iter().copied().collect();
        assert_eq!(unique.len(), collected.len(), "duplicated element");
        assert_eq!(collected.len(), senders * per_sender, "lost element");
        assert!(ch.coupling_holds());
    }

    /// Send on a closed channel hands the element back.
    #[test]
    fn send_after_close_fails() {
        let ch = Channel::<i32>::new(1);
        ch.done().unwrap();
        match ch.send(5) {
            Err(SendError::Closed(v)) => assert_eq!(v, 5),
            other => panic!("expected closed, got {other:?}"),
        }
    }

    /// Buffered elements are drained before the terminal state shows.
    #[test]
    fn close_drains_buffer_first() {
        let ch = Channel::<i32>::new(2);
        ch.send(1).unwrap();
        ch.send(2).unwrap();
        ch.done().unwrap();
        assert_eq!(ch.receive().unwrap(), 1);
        assert_eq!(ch.receive().unwrap(), 2);
        assert!(matches!(ch.receive(), Err(ReceiveError::Done)));
        // sticky
        assert!(matches!(ch.receive(), Err(ReceiveError::Done)));
    }

    /// An errored channel reports the same cause to every consumer.
    #[test]
    fn error_is_sticky_and_shared() {
        let ch = Channel::<i32>::new(1);
        ch.error("disk on fire").unwrap();
        for _ in 0..2 {
            match ch.receive() {
                Err(ReceiveError::Error(cause)) => {
                    assert_eq!(cause.to_string(), "disk on fire");
                }
                other => panic!("expected error, got {other:?}"),
            }
        }
        assert!(ch.done().is_err());
    }

    /// Closing wakes a parked receiver with the terminal state.
    #[test]
    fn close_wakes_parked_receiver() {
        let ch = Channel::<i32>::new(1);
        let got_done = scoped(|s| {
            let rx = ch.clone();
            let f = s.fork(move |_| matches!(rx.receive(), Err(ReceiveError::Done)));
            task::sleep(Duration::from_millis(50)).unwrap();
            ch.done().unwrap();
            f.join()
        });
        assert!(got_done);
    }

    /// A receiver parked on an empty channel is paired directly by the
    /// next sender, without the element touching the buffer.
    #[test]
    fn sender_pairs_with_parked_receiver() {
        let ch = Channel::<i32>::new(1);
        let v = scoped(|s| {
            let rx = ch.clone();
            let f = s.fork(move |_| rx.receive().unwrap());
            task::sleep(Duration::from_millis(50)).unwrap();
            ch.send(42).unwrap();
            f.join()
        });
        assert_eq!(v, 42);
        assert!(ch.coupling_holds());
    }

    #[derive(Debug, Clone)]
    struct DropCounter(Arc<AtomicUsize>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Elements still buffered when the last handle drops are dropped
    /// with it (no leak).
    #[test]
    fn drop_unread_elements() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let ch = Channel::new(4);
            ch.send(DropCounter(drops.clone())).unwrap();
            ch.send(DropCounter(drops.clone())).unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    /// Interrupting a parked receiver either propagates the interrupt
    /// with no element consumed, or returns a legally delivered element;
    /// the element is never lost and never duplicated.
    #[test]
    fn interrupt_cleanliness() {
        for round in 0..200 {
            let ch = Channel::<i32>::new(1);
            let sent = AtomicBool::new(false);
            let outcome = scoped(|s| {
                let rx = ch.clone();
                let (handle_tx, handle_rx) = std::sync::mpsc::channel();
                let receiver = s.fork(move |_| {
                    handle_tx.send(task::current()).unwrap();
                    rx.receive()
                });
                let handle = handle_rx.recv().unwrap();
                let tx = ch.clone();
                let sent = &sent;
                s.fork(move |_| {
                    if tx.send(7).is_ok() {
                        sent.store(true, Ordering::SeqCst);
                    }
                });
                // vary the race a little from round to round
                if round % 2 == 0 {
                    std::thread::yield_now();
                }
                handle.interrupt();
                receiver.join()
            });
            match outcome {
                Ok(v) => {
                    assert_eq!(v, 7);
                    assert!(sent.load(Ordering::SeqCst));
                    assert_eq!(select_now(&[&ch]), None, "duplicated element");
                }
                Err(ReceiveError::Interrupted) => {
                    // nothing consumed: if the send went through, the
                    // element must still be in the channel
                    if sent.load(Ordering::SeqCst) {
                        assert_eq!(select_now(&[&ch]), Some(7));
                    }
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::channel::error::SendError;
use crate::task::{self, Task};

/// The element half of a channel: a bounded FIFO with a blocking,
/// interruptible `put` and non-blocking `poll`/`peek`.
///
/// Senders that find the queue full register themselves and park. Each
/// `poll` that removes an element frees exactly one slot and wakes
/// exactly one parked sender; only `close` wakes them all. Registration
/// and the fullness check happen in the same critical section, so a
/// wakeup cannot slip between them, and a sender unregisters itself on
/// every exit path so a consumed wakeup always reaches a live waiter.
pub(super) struct Buffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

struct Inner<T> {
    queue: VecDeque<T>,
    /// Senders parked on a full queue.
    parked: Vec<Arc<Task>>,
    closed: bool,
}

impl<T> Buffer<T> {
    pub(super) fn new(capacity: usize) -> Self {
        Buffer {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                parked: Vec::new(),
                closed: false,
            }),
            capacity,
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocking enqueue. On interruption or close the element is handed
    /// back without having been enqueued.
    pub(super) fn put(&self, value: T) -> Result<(), SendError<T>> {
        let me = task::current();
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                // a spurious unpark would otherwise re-register us twice
                Self::unregister(&mut inner, &me);
                if inner.closed {
                    return Err(SendError::Closed(value));
                }
                if inner.queue.len() < self.capacity {
                    inner.queue.push_back(value);
                    return Ok(());
                }
                inner.parked.push(me.clone());
            }
            if task::check_interrupt().is_err() {
                let mut inner = self.inner.lock().unwrap();
                Self::unregister(&mut inner, &me);
                // we may have absorbed a wakeup meant for a neighbour
                if inner.queue.len() < self.capacity {
                    Self::wake_one(&mut inner);
                }
                return Err(SendError::Interrupted(value));
            }
            task::park();
        }
    }

    pub(super) fn poll(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        let value = inner.queue.pop_front();
        // one freed slot, one sender
        if value.is_some() {
            Self::wake_one(&mut inner);
        }
        value
    }

    /// Whether an element is currently buffered.
    pub(super) fn peek(&self) -> bool {
        !self.inner.lock().unwrap().queue.is_empty()
    }

    pub(super) fn is_empty(&self) -> bool {
        !self.peek()
    }

    /// Marks the buffer closed and releases every parked sender.
    /// Buffered elements stay pollable.
    pub(super) fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        for sender in inner.parked.drain(..) {
            sender.unpark();
        }
    }

    fn wake_one(inner: &mut Inner<T>) {
        if let Some(sender) = inner.parked.pop() {
            sender.unpark();
        }
    }

    fn unregister(inner: &mut Inner<T>, me: &Arc<Task>) {
        if let Some(at) = inner.parked.iter().position(|t| Arc::ptr_eq(t, me)) {
            inner.parked.remove(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    /// A put into a full buffer blocks until a poll frees a slot.
    #[test]
    fn put_blocks_until_poll() {
        let buffer = Buffer::new(1);
        buffer.put(1).unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                buffer.put(2).unwrap();
            });
            thread::sleep(Duration::from_millis(20));
            assert_eq!(buffer.poll(), Some(1));
        });
        assert_eq!(buffer.poll(), Some(2));
        assert_eq!(buffer.poll(), None);
    }

    /// Closing releases a parked sender with the element handed back.
    #[test]
    fn close_releases_parked_sender() {
        let buffer = Buffer::new(1);
        buffer.put(1).unwrap();
        thread::scope(|s| {
            s.spawn(|| match buffer.put(2) {
                Err(SendError::Closed(v)) => assert_eq!(v, 2),
                other => panic!("expected closed, got {other:?}"),
            });
            thread::sleep(Duration::from_millis(20));
            buffer.close();
        });
        // the buffered element survives the close
        assert_eq!(buffer.poll(), Some(1));
    }

    /// Interrupting a parked sender aborts the put cleanly.
    #[test]
    fn interrupt_releases_parked_sender() {
        let buffer = Buffer::new(1);
        buffer.put(1).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        thread::scope(|s| {
            s.spawn(|| {
                tx.send(task::current()).unwrap();
                match buffer.put(2) {
                    Err(SendError::Interrupted(v)) => assert_eq!(v, 2),
                    other => panic!("expected interrupt, got {other:?}"),
                }
            });
            let sender = rx.recv().unwrap();
            thread::sleep(Duration::from_millis(20));
            sender.interrupt();
        });
        assert_eq!(buffer.poll(), Some(1));
        assert_eq!(buffer.poll(), None);
    }

    /// FIFO order is preserved across refills.
    #[test]
    fn fifo_order() {
        let buffer = Buffer::new(2);
        buffer.put(1).unwrap();
        buffer.put(2).unwrap();
        assert_eq!(buffer.poll(), Some(1));
        buffer.put(3).unwrap();
        assert_eq!(buffer.poll(), Some(2));
        assert_eq!(buffer.poll(), Some(3));
    }
}

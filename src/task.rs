//! Per-task parking and cooperative interruption.
//!
//! Every OS thread taking part in a rendezvous lazily owns a [`Task`]
//! handle: an unpark target plus a sticky interrupt flag. Blocking
//! primitives in this crate are loops of the form *register, re-check,
//! [`park`]* and treat an unpark as a hint, so any number of wakeup
//! sources (a completed cell, a freed buffer slot, an interrupt) may
//! share the same thread without coordination.
//!
//! Interruption is cooperative: [`Task::interrupt`] sets the flag and
//! unparks the thread; the blocked operation observes it at its next
//! check via [`check_interrupt`], which clears the flag so a caller that
//! decides to continue can be signalled again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// The cancellation signal observed by a blocked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Handle to a running task: the thread to unpark and its interrupt flag.
pub struct Task {
    thread: thread::Thread,
    interrupted: AtomicBool,
}

thread_local! {
    static CURRENT: Arc<Task> = Arc::new(Task {
        thread: thread::current(),
        interrupted: AtomicBool::new(false),
    });
}

/// Returns the handle of the calling task, creating it on first use.
pub fn current() -> Arc<Task> {
    CURRENT.with(Arc::clone)
}

impl Task {
    /// Requests cancellation: sets the flag and unparks the thread so a
    /// blocked operation re-checks. Idempotent.
    pub fn interrupt(&self) {
        // release-store: pairs with the acquire in `take_interrupt` so the
        // woken task observes everything written before the interrupt
        self.interrupted.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Reads the flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Re-arms the flag without waking anybody. Used when a delivered
    /// element is honored over a concurrent interrupt and the signal must
    /// stay observable to the caller.
    pub(crate) fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn unpark(&self) {
        self.thread.unpark();
    }
}

/// Parks the calling thread. Spurious returns are allowed; every caller
/// loops around a re-check of its wait condition.
pub(crate) fn park() {
    thread::park();
}

/// Clears and reports the calling task's interrupt flag.
pub fn check_interrupt() -> Result<(), Interrupted> {
    if CURRENT.with(|t| t.take_interrupt()) {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Re-arms the calling task's interrupt flag.
pub(crate) fn set_interrupted() {
    CURRENT.with(|t| t.set_interrupted());
}

/// Interruptible sleep.
///
/// Returns `Err(Interrupted)` as soon as the task is interrupted; the
/// flag is cleared, like any other observed interrupt.
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        check_interrupt()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::park_timeout(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An uninterrupted sleep runs to the deadline.
    #[test]
    fn sleep_runs_to_deadline() {
        let start = Instant::now();
        sleep(Duration::from_millis(50)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    /// Interrupting a sleeping task wakes it early with `Err(Interrupted)`.
    #[test]
    fn interrupt_cuts_sleep_short() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(current()).unwrap();
            sleep(Duration::from_secs(10))
        });
        let task = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        task.interrupt();
        assert_eq!(handle.join().unwrap(), Err(Interrupted));
    }

    /// `check_interrupt` clears the flag so the signal fires once.
    #[test]
    fn check_interrupt_clears_the_flag() {
        current().set_interrupted();
        assert_eq!(check_interrupt(), Err(Interrupted));
        assert_eq!(check_interrupt(), Ok(()));
    }
}
